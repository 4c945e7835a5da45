//! Matchpoint: parimutuel betting and settlement engine for tennis-club
//! matches.
//!
//! Users back one of two players on a scheduled match; the pool wagered
//! on each side sets the odds; an admin finishes the match with a winner
//! (settling every bet atomically) or cancels it (refunding every bet).

mod db;
mod engine;
mod error;
mod gateway;
mod models;
mod pool;
mod reporting;
mod sweeper;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::db::Database;
use crate::engine::{AdminContext, Engine, EngineConfig};
use crate::reporting::ReportingService;
use crate::sweeper::Sweeper;

/// Matchpoint betting engine CLI.
#[derive(Parser)]
#[command(name = "matchpoint")]
#[command(about = "Parimutuel betting engine for tennis-club matches", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./matchpoint.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a betting market for a scheduled match
    Open {
        /// Schedule entry the match belongs to
        #[arg(long)]
        schedule_id: i64,

        #[arg(long)]
        player1: String,

        #[arg(long)]
        player2: String,

        /// Open with betting disabled
        #[arg(long)]
        disabled: bool,
    },

    /// Enable or disable betting on an upcoming market
    SetBetting {
        market_id: i64,

        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
    },

    /// Mark a market as live (betting closes, display only)
    MarkLive { market_id: i64 },

    /// Place a bet backed by a captured payment
    Bet {
        /// Betting user id
        #[arg(long)]
        user: i64,

        /// Market to bet on
        #[arg(long)]
        market: i64,

        /// Player to back
        #[arg(long)]
        player: String,

        /// Stake in currency units
        #[arg(long)]
        amount: Decimal,

        /// Payment capture reference from the gateway
        #[arg(long)]
        payment_ref: String,
    },

    /// Finish a match with a winner and settle every bet
    Finish {
        market_id: i64,

        #[arg(long)]
        winner: String,

        #[arg(long)]
        score: Option<String>,

        /// Acting admin identity
        #[arg(long, env = "MATCHPOINT_ADMIN", default_value = "cli-admin")]
        admin: String,
    },

    /// Cancel a match and refund every active bet
    Cancel {
        market_id: i64,

        /// Acting admin identity
        #[arg(long, env = "MATCHPOINT_ADMIN", default_value = "cli-admin")]
        admin: String,
    },

    /// Refund a single bet while its match is still upcoming
    RefundBet {
        bet_id: i64,

        /// Owning user id
        #[arg(long)]
        user: i64,
    },

    /// List markets with pools and odds
    Markets,

    /// Betting statistics and live odds for one market
    Stats { market_id: i64 },

    /// List bets by user or by market
    Bets {
        #[arg(long)]
        user: Option<i64>,

        #[arg(long)]
        market: Option<i64>,
    },

    /// Full betting report for one match
    Report { market_id: i64 },

    /// Aggregate market and bet rollups by status
    Rollups,

    /// Run the refund sweeper loop
    Sweep {
        /// Polling interval in seconds
        #[arg(short, long, default_value = "60")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Initialize ledger and engine
    let ledger = Arc::new(Database::new(&cli.database).await?);
    let gateway = gateway::from_env()?;
    let config = EngineConfig::default();
    let engine = Engine::new(ledger.clone(), gateway, config.clone());
    let reporting = ReportingService::new(ledger.clone());

    match cli.command {
        Commands::Open {
            schedule_id,
            player1,
            player2,
            disabled,
        } => {
            let market = engine
                .lifecycle
                .open(schedule_id, &player1, &player2, !disabled)
                .await?;

            println!(
                "Market {}: {} vs {} ({}, betting {})",
                market.id,
                market.player1_name,
                market.player2_name,
                market.status,
                if market.betting_enabled { "open" } else { "closed" }
            );
        }

        Commands::SetBetting { market_id, enabled } => {
            let market = engine.lifecycle.set_betting_enabled(market_id, enabled).await?;
            println!(
                "Market {}: betting {}",
                market.id,
                if market.betting_enabled { "enabled" } else { "disabled" }
            );
        }

        Commands::MarkLive { market_id } => {
            let market = engine.lifecycle.mark_live(market_id).await?;
            println!("Market {}: {}", market.id, market.status);
        }

        Commands::Bet {
            user,
            market,
            player,
            amount,
            payment_ref,
        } => {
            let placed = engine
                .placement
                .place_bet(user, market, &player, amount, &payment_ref)
                .await?;

            if placed.created {
                println!("Bet {} placed: ${} on {}", placed.bet.id, placed.bet.amount, placed.bet.player_name);
            } else {
                println!("Bet {} already recorded for this payment", placed.bet.id);
            }
            if placed.bet.potential_return > Decimal::ZERO {
                println!("Estimated return: ${} (floats with the pool until settlement)", placed.bet.potential_return);
            } else {
                println!("Estimated return: N/A until both players have bets");
            }
        }

        Commands::Finish {
            market_id,
            winner,
            score,
            admin,
        } => {
            let admin = AdminContext::new(admin);
            let summary = engine
                .lifecycle
                .finish(&admin, market_id, &winner, score.as_deref())
                .await?;

            println!("\n=== Market {} settled ===", summary.market.id);
            println!("Winner:        {}", winner);
            if let Some(score) = &summary.market.score {
                println!("Score:         {}", score);
            }
            println!("Total pool:    ${}", summary.total_pool);
            println!("Payout pool:   ${}", summary.payout_pool);
            println!("Winning bets:  {}", summary.winning_bets);
            println!("Losing bets:   {}", summary.losing_bets);
            for outcome in &summary.outcomes {
                println!(
                    "  bet {:<5} {:<5} ${}",
                    outcome.bet_id, outcome.status, outcome.final_return
                );
            }
            if summary.flagged_for_review {
                println!("\nWARNING: nobody backed the winner; no payouts made. Review required.");
            }
        }

        Commands::Cancel { market_id, admin } => {
            let admin = AdminContext::new(admin);
            let summary = engine.lifecycle.cancel(&admin, market_id).await?;

            println!("\n=== Market {} cancelled ===", summary.market.id);
            println!("Bets refunded:   {}", summary.refunded_bets);
            println!("Refunds moved:   {}", summary.succeeded);
            println!("Refunds failed:  {}", summary.failed);
            println!("Still pending:   {}", summary.still_pending);
            if summary.failed > 0 {
                println!("\nFailed refunds need manual remediation (see rollups).");
            }
        }

        Commands::RefundBet { bet_id, user } => {
            let bet = engine.settlement.refund_bet(user, bet_id).await?;
            println!(
                "Bet {} refunded (${}, refund {})",
                bet.id, bet.amount, bet.refund_status
            );
        }

        Commands::Markets => {
            let markets = engine.list_markets().await?;

            if markets.is_empty() {
                println!("No markets. Use 'matchpoint open' to create one.");
                return Ok(());
            }

            println!(
                "\n{:<5} {:<30} {:<10} {:>10} {:>8} {:>8}",
                "ID", "MATCH", "STATUS", "POOL", "ODDS 1", "ODDS 2"
            );
            println!("{}", "-".repeat(76));

            for entry in markets {
                let matchup = format!(
                    "{} vs {}",
                    entry.market.player1_name, entry.market.player2_name
                );
                let odds1 = entry
                    .odds
                    .get(&entry.market.player1_name)
                    .map(|o| format!("{o}x"))
                    .unwrap_or_else(|| "N/A".to_string());
                let odds2 = entry
                    .odds
                    .get(&entry.market.player2_name)
                    .map(|o| format!("{o}x"))
                    .unwrap_or_else(|| "N/A".to_string());

                println!(
                    "{:<5} {:<30} {:<10} {:>10} {:>8} {:>8}",
                    entry.market.id,
                    truncate(&matchup, 28),
                    entry.market.status.to_string(),
                    format!("${}", entry.total_pool),
                    odds1,
                    odds2
                );
            }
        }

        Commands::Stats { market_id } => {
            let stats = engine.market_stats(market_id).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Bets { user, market } => {
            let bets = match (user, market) {
                (Some(user), _) => engine.ledger().bets_by_user(user).await?,
                (None, Some(market)) => engine.ledger().bets_by_market(market).await?,
                (None, None) => {
                    println!("Specify --user or --market.");
                    return Ok(());
                }
            };

            if bets.is_empty() {
                println!("No bets found.");
                return Ok(());
            }

            println!(
                "\n{:<5} {:<8} {:<8} {:<16} {:>10} {:<9} {:>10} {:<9}",
                "ID", "MARKET", "USER", "PLAYER", "AMOUNT", "STATUS", "RETURN", "REFUND"
            );
            println!("{}", "-".repeat(84));

            for bet in bets {
                println!(
                    "{:<5} {:<8} {:<8} {:<16} {:>10} {:<9} {:>10} {:<9}",
                    bet.id,
                    bet.market_id,
                    bet.user_id,
                    truncate(&bet.player_name, 14),
                    format!("${}", bet.amount),
                    bet.status.to_string(),
                    format!("${}", bet.potential_return),
                    bet.refund_status.to_string()
                );
            }
        }

        Commands::Report { market_id } => {
            let report = reporting.market_report(market_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Rollups => {
            let rollups = reporting.rollups().await?;
            println!("{}", serde_json::to_string_pretty(&rollups)?);
        }

        Commands::Sweep { interval } => {
            info!(interval, "Starting sweeper");

            let sweep_config = EngineConfig {
                sweep_interval_secs: interval,
                ..config
            };
            let sweeper = Sweeper::new(ledger, engine.settlement.clone(), sweep_config);

            println!("\n=== Matchpoint Refund Sweeper ===");
            println!("Interval: {}s", interval);
            println!("\nPress Ctrl+C to stop.\n");

            sweeper.run().await?;
        }
    }

    Ok(())
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}
