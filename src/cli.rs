use clap::{Parser, Subcommand};

use crate::domain::{AgentStatistics, BetType};

#[derive(Parser)]
#[command(name = "steward")]
#[command(author = "Steward Team")]
#[command(version = "0.1.0")]
#[command(about = "Settlement and scorekeeping for AI racing predictions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config directory path
    #[arg(short, long, default_value = "config")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the result checker service
    Run,
    /// Settle every stored prediction whose race result is available
    EvaluatePending {
        /// Database file path
        #[arg(long, default_value = "steward.db")]
        db: String,
        /// Report what would be settled without writing outcomes
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the agent leaderboard or one agent's record
    Stats {
        /// Database file path
        #[arg(long, default_value = "steward.db")]
        db: String,
        /// Show a single agent instead of the leaderboard
        #[arg(short, long)]
        agent: Option<String>,
        /// Maximum number of leaderboard rows
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Rebuild agent statistics from stored outcomes
    RecomputeStats {
        /// Database file path
        #[arg(long, default_value = "steward.db")]
        db: String,
    },
}

/// Print the leaderboard sorted the way the store returns it (ROI descending).
pub fn print_leaderboard(rows: &[AgentStatistics]) {
    if rows.is_empty() {
        println!("  No statistics recorded yet.");
        return;
    }

    println!(
        "  {:<4} {:<20} {:>6} {:>6} {:>6} {:>7} {:>12} {:>12} {:>12} {:>9}",
        "#", "Agent", "Preds", "Bets", "Wins", "Losses", "Stake", "Payout", "Net", "ROI %"
    );
    println!("  {}", "-".repeat(103));

    for (i, stats) in rows.iter().enumerate() {
        println!(
            "  {:<4} {:<20} {:>6} {:>6} {:>6} {:>7} {:>12.2} {:>12.2} {:>12.2} {:>9.2}",
            i + 1,
            stats.agent_name,
            stats.total_predictions,
            stats.total_bets,
            stats.total_wins,
            stats.total_losses,
            stats.total_stake,
            stats.total_payout,
            stats.net_profit,
            stats.roi_pct,
        );
    }
    println!();
}

pub fn print_agent_statistics(stats: &AgentStatistics) {
    println!("  Agent:          {}", stats.agent_name);
    println!("  Predictions:    {}", stats.total_predictions);
    println!("  Bets placed:    {}", stats.total_bets);
    println!("  Bets won:       {}", stats.total_wins);
    println!("  Bets lost:      {}", stats.total_losses);
    println!("  Total staked:   {:.2}", stats.total_stake);
    println!("  Total payout:   {:.2}", stats.total_payout);
    println!("  Net profit:     {:.2}", stats.net_profit);
    println!("  ROI:            {:.2}%", stats.roi_pct);

    if stats.per_type.is_empty() {
        return;
    }

    println!();
    println!("  {:<10} {:>8} {:>8} {:>8}", "Bet type", "Placed", "Won", "Hit %");
    println!("  {}", "-".repeat(38));
    for bet_type in BetType::ALL {
        let tally = stats.tally(bet_type);
        if tally.placed == 0 {
            continue;
        }
        let hit_pct = tally.won as f64 / tally.placed as f64 * 100.0;
        println!(
            "  {:<10} {:>8} {:>8} {:>7.1}%",
            bet_type.as_str(),
            tally.placed,
            tally.won,
            hit_pct,
        );
    }
    println!();
}
