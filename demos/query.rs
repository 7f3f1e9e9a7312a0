//! Query - synchronous calls against a q process.
//!
//! This example demonstrates:
//! - Connecting with the TCP shorthand
//! - Evaluating q code with `call`
//! - Calling a function with arguments via `call_with`
//! - Telling server errors apart from transport failures
//!
//! # Running against a local q process
//!
//! ```text
//! $ q -p 5001
//! $ cargo run --example query -- 5001
//! ```

use kdb_ipc::{connect, ConnectOptions, Error, K};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port = match std::env::args().nth(1) {
        Some(port) => port.parse()?,
        None => 5001,
    };

    let conn = connect(ConnectOptions::tcp("localhost", port)).await?;
    println!("Connected, capability {}", conn.capability());

    // A string is sent as q code
    let numbers = conn.call("til 5").await?;
    println!("til 5 -> {:?}", numbers);

    // (function; args...) as a general list
    let sum = conn.call_with("sum", [K::Longs(vec![1, 2, 3])]).await?;
    println!("sum 1 2 3 -> {:?}", sum.as_i64());

    // Server errors fail the call, not the connection
    match conn.call("1+`a").await {
        Err(Error::Server(message)) => println!("1+`a -> server error '{}'", message),
        other => println!("1+`a -> {:?}", other),
    }

    // Fire-and-forget: resolves once written
    conn.send("demo:42").await?;
    println!("demo -> {:?}", conn.call("demo").await?);

    conn.close().await;
    Ok(())
}
