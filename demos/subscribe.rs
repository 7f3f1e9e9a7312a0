//! Subscribe - receiving updates from a tickerplant.
//!
//! This example demonstrates:
//! - Listening to connection events with `subscribe()`
//! - Registering with `.u.sub` as an async message
//! - Handling `upd` pushes and the end of the connection
//!
//! # Running against a tickerplant
//!
//! ```text
//! $ q tick.q sym . -p 5010
//! $ cargo run --example subscribe -- 5010 trade
//! ```

use kdb_ipc::{connect, ConnectOptions, Event, K};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let port = match args.next() {
        Some(port) => port.parse()?,
        None => 5010,
    };
    let table = args.next().unwrap_or_default();

    let conn = connect(ConnectOptions::tcp("localhost", port)).await?;

    // Subscribe before registering so no update is missed
    let mut events = conn.subscribe();
    conn.send_with(".u.sub", [K::symbol(table), K::symbol("")]).await?;

    loop {
        match events.recv().await {
            Ok(Event::Update(update)) => {
                let name = update.get(1);
                let rows = update.get(2);
                println!("upd {:?}: {:?}", name, rows);
            }
            Ok(Event::Timeout) => println!("No data yet"),
            Ok(Event::End) => println!("Tickerplant closed the connection"),
            Ok(Event::Error(e)) => eprintln!("Connection error: {}", e),
            Ok(Event::Close { had_error }) => {
                println!("Closed (had_error: {})", had_error);
                break;
            }
            Err(RecvError::Lagged(skipped)) => eprintln!("Skipped {} events", skipped),
            Err(RecvError::Closed) => break,
        }
    }

    Ok(())
}
