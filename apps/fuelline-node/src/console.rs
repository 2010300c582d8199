//! # Hub Admin Console
//!
//! Line-oriented operator console on stdin. Input is validated here; only
//! well-formed commands reach the hub.
//!
//! ```text
//! > 95 1000        broadcast a base price
//! > report         ledger totals by fuel type and by relay
//! > status         connections, cached prices, ledger health, recent activity
//! > help
//! > quit
//! ```

use fuelline_core::validation::{parse_base_price, parse_fuel_type};
use fuelline_core::{FuelType, Price, ValidationError};
use fuelline_db::Database;
use fuelline_sync::HubHandle;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

/// Activity lines shown by `status`.
const STATUS_ACTIVITY_LINES: usize = 10;

const HELP: &str = "commands: <fuel> <price> | report | status | help | quit";

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetPrice { fuel_type: FuelType, base_price: Price },
    Report,
    Status,
    Help,
    Quit,
    Empty,
}

#[derive(Debug)]
pub enum ParseError {
    Invalid(ValidationError),
    Unknown(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Invalid(err) => write!(f, "{}", err),
            ParseError::Unknown(word) => write!(f, "unknown command '{}' ({})", word, HELP),
        }
    }
}

impl From<ValidationError> for ParseError {
    fn from(err: ValidationError) -> Self {
        ParseError::Invalid(err)
    }
}

/// Parses one console line.
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let words: Vec<&str> = line.split_whitespace().collect();

    match words.as_slice() {
        [] => Ok(Command::Empty),
        [word] => match word.to_ascii_lowercase().as_str() {
            "report" => Ok(Command::Report),
            "status" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            _ => Err(ParseError::Unknown(word.to_string())),
        },
        [fuel, price] => Ok(Command::SetPrice {
            fuel_type: parse_fuel_type(fuel)?,
            base_price: parse_base_price(price)?,
        }),
        [word, ..] => Err(ParseError::Unknown(word.to_string())),
    }
}

// =============================================================================
// Console Loop
// =============================================================================

/// Runs the console until `quit` or end of input.
///
/// `ledger` is the hub's database, checked by `status`.
pub async fn run(hub: HubHandle, ledger: Database) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Console input closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Console read failed");
                return;
            }
        };

        match parse_command(&line) {
            Ok(Command::Quit) => return,
            Ok(command) => execute(&hub, &ledger, command).await,
            Err(err) => println!("error: {}", err),
        }
    }
}

async fn execute(hub: &HubHandle, ledger: &Database, command: Command) {
    match command {
        Command::SetPrice { fuel_type, base_price } => {
            match hub.broadcast_price(fuel_type.clone(), base_price).await {
                Ok(outcome) => println!(
                    "{} = {} sent to {} relay(s)",
                    fuel_type, base_price, outcome.delivered
                ),
                Err(err) => println!("error: {}", err),
            }
        }
        Command::Report => print_report(hub).await,
        Command::Status => {
            println!("{}", hub.status().await);
            if ledger.health_check().await {
                println!("ledger: ok");
            } else {
                warn!("Ledger database is not answering queries");
                println!("ledger: unavailable, sale reports are not being recorded");
            }
            for entry in hub.recent_activity(STATUS_ACTIVITY_LINES) {
                println!("  {}", entry);
            }
        }
        Command::Help => println!("{}", HELP),
        Command::Quit | Command::Empty => {}
    }
}

async fn print_report(hub: &HubHandle) {
    match hub.fuel_totals().await {
        Ok(rows) if rows.is_empty() => println!("no sales recorded"),
        Ok(rows) => {
            println!("{:<10} {:>12} {:>8} {:>8}", "fuel", "litres", "loads", "reports");
            for row in rows {
                println!(
                    "{:<10} {:>12.2} {:>8} {:>8}",
                    row.fuel_type, row.litres, row.loads, row.reports
                );
            }
        }
        Err(err) => println!("error: {}", err),
    }

    match hub.relay_totals().await {
        Ok(rows) if rows.is_empty() => {}
        Ok(rows) => {
            println!("{:<16} {:>12} {:>8}", "relay", "litres", "loads");
            for row in rows {
                let relay = row.relay_id.as_deref().unwrap_or("(direct)");
                println!("{:<16} {:>12.2} {:>8}", relay, row.litres, row.loads);
            }
        }
        Err(err) => println!("error: {}", err),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price_line() {
        let command = parse_command("  95   1000 ").unwrap();
        assert_eq!(
            command,
            Command::SetPrice {
                fuel_type: FuelType::from("95"),
                base_price: 1000,
            }
        );
    }

    #[test]
    fn test_parse_fuel_is_case_insensitive() {
        match parse_command("diesel 2000").unwrap() {
            Command::SetPrice { fuel_type, .. } => assert_eq!(fuel_type.as_str(), "Diesel"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(parse_command("95 abc"), Err(ParseError::Invalid(_))));
        assert!(matches!(parse_command("95 0"), Err(ParseError::Invalid(_))));
        assert!(matches!(parse_command("LPG 1000"), Err(ParseError::Invalid(_))));
        assert!(matches!(parse_command("launch"), Err(ParseError::Unknown(_))));
        assert!(matches!(parse_command("95 1000 extra"), Err(ParseError::Unknown(_))));
    }

    #[test]
    fn test_parse_keywords() {
        assert_eq!(parse_command("").unwrap(), Command::Empty);
        assert_eq!(parse_command("REPORT").unwrap(), Command::Report);
        assert_eq!(parse_command("status").unwrap(), Command::Status);
        assert_eq!(parse_command("exit").unwrap(), Command::Quit);
    }
}
