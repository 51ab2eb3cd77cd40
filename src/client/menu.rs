//! Interactive terminal menu driving the client engine. Options 1..7 map to
//! QUERY, BOOK, CHANGE, MONITOR-REGISTER, EXTEND, CANCEL, EXIT.

use anyhow::anyhow;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::client::{BookingClient, ClientError};
use crate::protocol::time::WeekTime;

const MENU: &str = "
Facility Booking Client
  1) Query availability
  2) Book a facility
  3) Change a booking
  4) Monitor a facility
  5) Extend a booking
  6) Cancel a booking
  7) Exit
";

pub async fn run(client: &mut BookingClient) -> anyhow::Result<()> {
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("{}", MENU);
        let Some(choice) = prompt(&mut input, "option> ").await? else {
            return Ok(());
        };

        let outcome = match choice.trim() {
            "1" => query(client, &mut input).await,
            "2" => book(client, &mut input).await,
            "3" => change(client, &mut input).await,
            "4" => monitor(client, &mut input).await,
            "5" => extend(client, &mut input).await,
            "6" => cancel(client, &mut input).await,
            "7" => return Ok(()),
            other => {
                println!("unknown option '{}'", other);
                continue;
            }
        };

        match outcome {
            Ok(()) => {}
            Err(MenuError::Client(e)) => println!("request failed: {}", e),
            Err(MenuError::Input(e)) => println!("invalid input: {}", e),
            Err(MenuError::Eof) => return Ok(()),
        }
    }
}

enum MenuError {
    Client(ClientError),
    Input(anyhow::Error),
    Eof,
}

impl From<ClientError> for MenuError {
    fn from(e: ClientError) -> Self {
        MenuError::Client(e)
    }
}

async fn prompt(input: &mut Lines<BufReader<Stdin>>, label: &str) -> anyhow::Result<Option<String>> {
    println!("{}", label);
    Ok(input.next_line().await?)
}

async fn read_line(input: &mut Lines<BufReader<Stdin>>, label: &str) -> Result<String, MenuError> {
    match prompt(input, label).await {
        Ok(Some(line)) => Ok(line.trim().to_string()),
        Ok(None) => Err(MenuError::Eof),
        Err(e) => Err(MenuError::Input(e)),
    }
}

async fn read_time(input: &mut Lines<BufReader<Stdin>>, label: &str) -> Result<WeekTime, MenuError> {
    let line = read_line(input, label).await?;
    parse_time(&line).map_err(MenuError::Input)
}

fn parse_time(line: &str) -> anyhow::Result<WeekTime> {
    let mut parts = line.split_whitespace();
    let day = parts.next().ok_or_else(|| anyhow!("expected: day hour minute"))?.parse()?;
    let hour = parts.next().ok_or_else(|| anyhow!("expected: day hour minute"))?.parse()?;
    let minute = parts.next().ok_or_else(|| anyhow!("expected: day hour minute"))?.parse()?;
    WeekTime::try_from_parts(day, hour, minute)
}

fn parse_days(line: &str) -> anyhow::Result<Vec<u8>> {
    let mut days = Vec::new();
    for part in line.split_whitespace() {
        let day: u8 = part.parse()?;
        if day > 6 {
            return Err(anyhow!("day {} out of range (0=Mon .. 6=Sun)", day));
        }
        days.push(day);
    }
    Ok(days)
}

async fn query(client: &mut BookingClient, input: &mut Lines<BufReader<Stdin>>) -> Result<(), MenuError> {
    let facility = read_line(input, "facility name> ").await?;
    let days_line = read_line(input, "days (0=Mon .. 6=Sun, space separated)> ").await?;
    let days = parse_days(&days_line).map_err(MenuError::Input)?;

    let free = client.query(&facility, days).await?;
    if free.is_empty() {
        println!("'{}' is fully booked on the requested days", facility);
    } else {
        println!("free intervals for '{}':", facility);
        for interval in free {
            println!("  {}", interval);
        }
    }
    Ok(())
}

async fn book(client: &mut BookingClient, input: &mut Lines<BufReader<Stdin>>) -> Result<(), MenuError> {
    let facility = read_line(input, "facility name> ").await?;
    let start = read_time(input, "start (day hour minute)> ").await?;
    let end = read_time(input, "end (day hour minute)> ").await?;

    let confirmation_id = client.book(&facility, start, end).await?;
    println!("booked, confirmation id: {}", confirmation_id);
    Ok(())
}

async fn change(client: &mut BookingClient, input: &mut Lines<BufReader<Stdin>>) -> Result<(), MenuError> {
    let confirmation_id = read_line(input, "confirmation id> ").await?;
    let offset_line = read_line(input, "offset in minutes (negative shifts earlier)> ").await?;
    let offset: i32 = offset_line.parse().map_err(|e| MenuError::Input(anyhow!("{}", e)))?;

    client.change(&confirmation_id, offset).await?;
    println!("booking {} shifted by {} minutes", confirmation_id, offset);
    Ok(())
}

async fn monitor(client: &mut BookingClient, input: &mut Lines<BufReader<Stdin>>) -> Result<(), MenuError> {
    let facility = read_line(input, "facility name> ").await?;
    let duration_line = read_line(input, "duration in seconds> ").await?;
    let duration: u32 = duration_line.parse().map_err(|e| MenuError::Input(anyhow!("{}", e)))?;

    println!("monitoring '{}' for {}s (blocks until the window ends)", facility, duration);
    client
        .monitor(&facility, duration, |free| {
            println!("availability of '{}' changed:", facility);
            if free.is_empty() {
                println!("  fully booked");
            }
            for interval in free {
                println!("  {}", interval);
            }
        })
        .await?;
    println!("monitoring window ended");
    Ok(())
}

async fn extend(client: &mut BookingClient, input: &mut Lines<BufReader<Stdin>>) -> Result<(), MenuError> {
    let confirmation_id = read_line(input, "confirmation id> ").await?;
    let extra_line = read_line(input, "extra minutes> ").await?;
    let extra: u32 = extra_line.parse().map_err(|e| MenuError::Input(anyhow!("{}", e)))?;

    client.extend(&confirmation_id, extra).await?;
    println!("booking {} extended by {} minutes past its original end", confirmation_id, extra);
    Ok(())
}

async fn cancel(client: &mut BookingClient, input: &mut Lines<BufReader<Stdin>>) -> Result<(), MenuError> {
    let confirmation_id = read_line(input, "confirmation id> ").await?;
    client.cancel(&confirmation_id).await?;
    println!("booking {} cancelled", confirmation_id);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("0 9 30").unwrap().minutes(), 9 * 60 + 30);
        assert_eq!(parse_time("  6 23 59 ").unwrap().minutes(), 10_079);
        assert!(parse_time("1 2").is_err());
        assert!(parse_time("7 1 0").is_err());
        assert!(parse_time("a b c").is_err());
    }

    #[test]
    fn test_parse_days() {
        assert_eq!(parse_days("0 3 6").unwrap(), vec![0, 3, 6]);
        assert!(parse_days("7").is_err());
        assert!(parse_days("x").is_err());
        assert!(parse_days("").unwrap().is_empty());
    }
}
