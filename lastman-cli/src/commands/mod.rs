pub mod oracle;

pub use oracle::{handle_oracle_command, OracleCommands};

use chrono::{DateTime, Utc};
use clap::Args;
use comfy_table::{presets::UTF8_FULL, Table};
use dialoguer::Confirm;
use lastman_core::{
    Amount, GameConfig, GameError, Identity, ManualOracle, Result, RoundEngine, RoundId,
    RoundSnapshot, SettlementJournal, SlotId,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Everything a command needs, built once in `main`.
pub struct Context<'a> {
    pub engine: &'a RoundEngine,
    pub oracle: &'a Arc<ManualOracle>,
    pub journal: &'a Arc<SettlementJournal>,
    pub now: DateTime<Utc>,
}

#[derive(Args)]
pub struct InitArgs {
    /// Operator identity allowed to cancel slots and sweep residuals
    #[arg(short, long, default_value = "operator")]
    operator: String,
    /// Flat part of every deposit
    #[arg(long, default_value = "0.01")]
    base_deposit: Amount,
    /// Share of the pot added to each deposit, in basis points
    #[arg(long, default_value_t = 50)]
    pot_bps: u32,
    /// Every Nth deposit opens a bonus slot
    #[arg(long, default_value_t = 10)]
    bonus_interval: u64,
    /// Round timeout in hours
    #[arg(long, default_value_t = 24)]
    timeout_hours: u64,
    /// Delay before a bonus percentage becomes revealable, in hours
    #[arg(long, default_value_t = 24)]
    reveal_hours: u64,
    /// Pay bonuses as soon as they are revealed
    #[arg(long)]
    auto_pay: bool,
    /// Overwrite an existing configuration
    #[arg(short, long)]
    force: bool,
}

pub fn init(config_path: &Path, args: InitArgs) -> anyhow::Result<()> {
    if config_path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite",
            config_path.display()
        );
    }

    let config = GameConfig {
        base_deposit: args.base_deposit,
        pot_percentage_bps: args.pot_bps,
        bonus_interval: args.bonus_interval,
        round_timeout: Duration::from_secs(args.timeout_hours * 3600),
        reveal_delay: Duration::from_secs(args.reveal_hours * 3600),
        operator: Identity::new(args.operator),
        auto_pay_bonus: args.auto_pay,
        ..GameConfig::default()
    };
    config.validate()?;
    config.save(config_path)?;

    println!("Configuration written to {}", config_path.display());
    println!("  Base deposit: {}", config.base_deposit);
    println!("  Pot share: {} bps", config.pot_percentage_bps);
    println!("  Bonus every {} deposits", config.bonus_interval);
    println!("  Timeout: {}h", args.timeout_hours);
    println!("  Operator: {}", config.operator);
    Ok(())
}

fn print_round(round: &RoundSnapshot) {
    println!("Round {} ({:?})", round.id, round.status);
    println!("  Pot: {}", round.pot_amount);
    println!("  Reserved for bonuses: {}", round.reserved_bonus);
    println!("  Available: {}", round.available_pot);
    println!("  Deposits: {}", round.deposit_count);
    println!("  Next deposit: {}", round.next_deposit_amount);
    if let Some(last) = &round.last_depositor {
        println!("  Last depositor: {}", last);
    }
    match round.deadline {
        Some(deadline) => println!(
            "  Deadline: {} ({}s remaining)",
            deadline.to_rfc3339(),
            round.time_remaining_secs
        ),
        None => println!("  Deadline: none until the first deposit"),
    }
    if let Some(winner) = &round.winner {
        println!("  Winner: {}", winner);
        println!("  Prize claimed: {}", round.prize_claimed);
    }
}

pub async fn show_status(ctx: &Context<'_>) -> Result<()> {
    match ctx.engine.current_round(ctx.now).await {
        Some(round) => print_round(&round),
        None => {
            println!("No round has been opened yet.");
            println!(
                "The first deposit of {} opens round 1: lastman deposit <identity>",
                ctx.engine.pricing().base_deposit()
            );
        }
    }
    Ok(())
}

pub async fn show_round(ctx: &Context<'_>, round: u64) -> Result<()> {
    let round = ctx.engine.round(RoundId(round), ctx.now).await?;
    print_round(&round);
    Ok(())
}

pub async fn list_bonuses(ctx: &Context<'_>, round: u64) -> Result<()> {
    let slots = ctx.engine.bonus_slots(RoundId(round)).await?;
    if slots.is_empty() {
        println!("No bonus slots in round {}.", round);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "Deposit", "Depositor", "Pot", "Reserved", "Phase", "Request", "Commitment", "Percent",
        "Bonus",
    ]);

    for slot in slots {
        let request = slot
            .timelock_request
            .or(slot.randomness_request)
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            slot.slot_id.deposit_number.to_string(),
            slot.depositor.to_string(),
            slot.pot_snapshot.to_string(),
            slot.reserved.to_string(),
            format!("{:?}", slot.phase),
            request,
            slot.commitment_hash
                .map(|h| format!("{}..", &h[..16.min(h.len())]))
                .unwrap_or_else(|| "-".to_string()),
            slot.percentage
                .map(|p| format!("{}%", p))
                .unwrap_or_else(|| "hidden".to_string()),
            slot.bonus_amount
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub async fn list_summaries(ctx: &Context<'_>) -> Result<()> {
    let summaries = ctx.engine.round_summaries().await;
    if summaries.is_empty() {
        println!("No finalized rounds.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Round", "Winner", "Final Pot", "Deposits", "Ended", "Last Bonus"]);

    for summary in summaries {
        let last_bonus = summary
            .last_bonus
            .map(|b| format!("{} to {} ({}%)", b.amount, b.depositor, b.percentage))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            summary.round_id.to_string(),
            summary.winner.to_string(),
            summary.final_pot.to_string(),
            summary.total_deposits.to_string(),
            summary.ended_at.to_rfc3339(),
            last_bonus,
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub async fn deposit(ctx: &Context<'_>, identity: &str, amount: Option<Amount>) -> Result<()> {
    let amount = match amount {
        Some(amount) => amount,
        None => ctx
            .engine
            .current_round(ctx.now)
            .await
            .map(|r| r.next_deposit_amount)
            .unwrap_or_else(|| ctx.engine.pricing().base_deposit()),
    };

    let receipt = ctx
        .engine
        .submit_deposit(&Identity::new(identity), amount, ctx.now)
        .await?;

    println!("Deposit #{} accepted in round {}", receipt.deposit_number, receipt.round_id);
    println!("  Pot: {}", receipt.new_pot_amount);
    println!("  Next deposit: {}", receipt.next_deposit_amount);
    println!("  Deadline: {}", receipt.deadline.to_rfc3339());
    if let Some(slot) = receipt.bonus_slot {
        println!();
        println!("Bonus slot {} opened, waiting for randomness", slot);
    }
    Ok(())
}

pub async fn check_timeout(ctx: &Context<'_>) -> Result<()> {
    let finalized = ctx.engine.check_timeout(ctx.now).await?;

    println!("Round {} finalized", finalized.round_id);
    println!("  Winner: {}", finalized.winner);
    println!("  Pot: {}", finalized.pot_amount);
    println!("  Held for bonuses: {}", finalized.reserved_bonus);
    if finalized.unresolved_slots > 0 {
        println!("  Unresolved bonus slots: {}", finalized.unresolved_slots);
    }
    println!("Round {} started", finalized.next_round);
    Ok(())
}

pub async fn claim(ctx: &Context<'_>, identity: &str, round: u64) -> Result<()> {
    let receipt = ctx
        .engine
        .claim_prize(&Identity::new(identity), RoundId(round), ctx.now)
        .await?;

    println!("Prize of round {} paid to {}", round, receipt.to);
    println!("  Amount: {}", receipt.amount);
    println!("  Receipt: {}", receipt.id);
    Ok(())
}

pub async fn pay_bonus(ctx: &Context<'_>, round: u64, deposit: u64) -> Result<()> {
    let slot = SlotId::new(RoundId(round), deposit);
    let receipt = ctx.engine.pay_bonus(slot).await?;

    println!("Bonus {} paid to {}", slot, receipt.to);
    println!("  Amount: {}", receipt.amount);
    Ok(())
}

pub async fn redispatch(ctx: &Context<'_>, round: u64, deposit: u64) -> Result<()> {
    let slot = SlotId::new(RoundId(round), deposit);
    let request_id = ctx.engine.redispatch_slot(slot).await?;
    println!("Slot {} redispatched as request {}", slot, request_id);
    Ok(())
}

fn confirm(prompt: String) -> Result<bool> {
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| GameError::internal(e.to_string()))
}

pub async fn cancel_slot(
    ctx: &Context<'_>,
    operator: &str,
    round: u64,
    deposit: u64,
    reason: &str,
    force: bool,
) -> Result<()> {
    let slot = SlotId::new(RoundId(round), deposit);
    if !force && !confirm(format!("Cancel bonus slot {}? Its depositor gets nothing", slot))? {
        println!("Cancelled.");
        return Ok(());
    }

    let released = ctx
        .engine
        .cancel_slot(&Identity::new(operator), slot, reason, ctx.now)
        .await?;
    println!("Slot {} cancelled, {} released to the pot", slot, released);
    Ok(())
}

pub async fn sweep(
    ctx: &Context<'_>,
    operator: &str,
    round: u64,
    to: &str,
    force: bool,
) -> Result<()> {
    if !force && !confirm(format!("Sweep the residual of round {} to {}?", round, to))? {
        println!("Cancelled.");
        return Ok(());
    }

    let receipt = ctx
        .engine
        .sweep_residual(&Identity::new(operator), RoundId(round), &Identity::new(to), ctx.now)
        .await?;
    println!("Swept {} from round {} to {}", receipt.amount, round, receipt.to);
    Ok(())
}

pub fn list_anomalies(ctx: &Context<'_>) -> Result<()> {
    let anomalies = ctx.engine.anomalies();
    if anomalies.is_empty() {
        println!("No oracle anomalies recorded.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Time", "Slot", "Description"]);
    for anomaly in anomalies {
        table.add_row(vec![
            anomaly.timestamp.to_rfc3339(),
            anomaly.slot.to_string(),
            anomaly.description,
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub fn show_audit(ctx: &Context<'_>) -> Result<()> {
    let entries = ctx.engine.audit_log();
    if entries.is_empty() {
        println!("Audit log is empty.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Time", "Operator", "Action"]);
    for entry in entries {
        table.add_row(vec![
            entry.timestamp.to_rfc3339(),
            entry.operator.to_string(),
            serde_json::to_string(&entry.action)?,
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub async fn list_payouts(ctx: &Context<'_>) -> Result<()> {
    let receipts = ctx.journal.list().await?;
    if receipts.is_empty() {
        println!("No payouts journaled.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Time", "Recipient", "Amount", "Memo"]);
    for receipt in receipts {
        table.add_row(vec![
            receipt.timestamp.to_rfc3339(),
            receipt.to.to_string(),
            receipt.amount.to_string(),
            receipt.memo,
        ]);
    }

    println!("{}", table);
    Ok(())
}
