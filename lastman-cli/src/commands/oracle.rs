use super::Context;
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use lastman_core::{CallbackOutcome, GameError, RequestId, Result};

#[derive(Subcommand)]
pub enum OracleCommands {
    /// List requests waiting for an answer
    List,
    /// Answer a randomness request
    FulfillRandom {
        /// Request id
        request: u64,
        /// 32-byte value, hex encoded (random if omitted)
        #[arg(long)]
        value: Option<String>,
    },
    /// Answer a timelock request once its milestone passed
    FulfillTimelock {
        /// Request id
        request: u64,
        /// Report this percentage instead of the encrypted one
        #[arg(long)]
        percentage: Option<u32>,
    },
}

pub async fn handle_oracle_command(cmd: OracleCommands, ctx: &Context<'_>) -> Result<()> {
    match cmd {
        OracleCommands::List => {
            let queued = ctx.oracle.queued();
            if queued.is_empty() {
                println!("No oracle requests queued.");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Request", "Kind", "Slot", "Unlocks", "Requested"]);
            for request in queued {
                table.add_row(vec![
                    request.request_id.to_string(),
                    format!("{:?}", request.kind),
                    request.correlation.to_string(),
                    request
                        .unlock_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                    request.requested_at.to_rfc3339(),
                ]);
            }
            println!("{}", table);
        }

        OracleCommands::FulfillRandom { request, value } => {
            let value = value.as_deref().map(parse_random_value).transpose()?;
            let callback = ctx.oracle.fulfill_random(RequestId(request), value)?;
            let outcome = ctx.engine.handle_callback(callback, ctx.now).await?;
            print_outcome(request, &outcome);
        }

        OracleCommands::FulfillTimelock {
            request,
            percentage,
        } => {
            let request_id = RequestId(request);
            if let Some(unlock_at) = ctx
                .oracle
                .queued()
                .iter()
                .find(|q| q.request_id == request_id)
                .and_then(|q| q.unlock_at)
            {
                if ctx.now < unlock_at {
                    println!(
                        "Warning: request {} unlocks at {}, revealing early",
                        request,
                        unlock_at.to_rfc3339()
                    );
                }
            }

            let callback = ctx.oracle.fulfill_timelock(request_id, percentage)?;
            let outcome = ctx.engine.handle_callback(callback, ctx.now).await?;
            print_outcome(request, &outcome);
        }
    }

    Ok(())
}

fn parse_random_value(hex_value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_value.trim_start_matches("0x"))
        .map_err(|e| GameError::oracle(format!("invalid hex value: {}", e)))?;
    let mut value = [0u8; 32];
    if bytes.len() > value.len() {
        return Err(GameError::oracle("random value is longer than 32 bytes"));
    }
    // right-align shorter values
    value[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(value)
}

fn print_outcome(request: u64, outcome: &CallbackOutcome) {
    match outcome {
        CallbackOutcome::Committed {
            slot,
            timelock_request: Some(timelock),
        } => {
            println!("Slot {} committed its percentage", slot);
            println!("  Timelock request: {}", timelock);
        }
        CallbackOutcome::Committed {
            slot,
            timelock_request: None,
        } => {
            println!("Slot {} committed, but the timelock dispatch failed", slot);
            println!(
                "  Retry with: lastman redispatch {} {}",
                slot.round_id, slot.deposit_number
            );
        }
        CallbackOutcome::Revealed {
            slot,
            bonus_amount,
            mismatch,
            paid,
        } => {
            println!("Slot {} revealed, bonus {}", slot, bonus_amount);
            if *mismatch {
                println!("  Oracle reported a different value, see: lastman anomalies");
            }
            if *paid {
                println!("  Bonus paid");
            }
        }
        CallbackOutcome::Ignored => {
            println!("Request {} was not waiting for this answer, ignored", request);
        }
    }
}
