use std::error::Error;
use std::io::{self, Write};
use std::time::Duration;

use rollcall_rs::{
    Credentials, PaddingPolicy, RollcallClient, RollcallConfig, VERSION,
    config::DEFAULT_BASE_URL, goto_from_scan,
};
use tokio::runtime::Runtime;

fn prompt(label: &str) -> io::Result<String> {
    print!("{} ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn parse_bool(input: &str, default: bool) -> bool {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" => true,
        "n" | "no" | "false" => false,
        _ => default,
    }
}

fn parse_u64(input: &str, default: u64) -> u64 {
    input.trim().parse().ok().filter(|value| *value > 0).unwrap_or(default)
}

/// A bare token typed at the prompt is used as-is.
fn goto_token(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    goto_from_scan(input).or_else(|| Some(input.to_string()))
}

#[test]
#[ignore = "Requires network access, a live rollcall and manual input"]
fn interactive_rollcall() -> Result<(), Box<dyn Error>> {
    println!("rollcall-rs {} interactive smoke test", VERSION);
    println!("Provide inputs when prompted. Press Enter to accept defaults.\n");

    let base_answer = prompt(&format!("Portal base URL [{}]:", DEFAULT_BASE_URL))?;
    let goto_answer = prompt("goto token or scanned QR URL (blank for none):")?;
    let username = prompt("Username:")?;
    let password = prompt("Password (echoed):")?;
    let timeout_answer = prompt("Request timeout in seconds [15]:")?;
    let pkcs7_answer = prompt("Use PKCS#7 padding for encrypt_pwd? (y/N):")?;

    let mut config = RollcallConfig::default();
    if !base_answer.is_empty() {
        config.base_url = base_answer;
    }
    config.request_timeout_ms = Duration::from_secs(parse_u64(&timeout_answer, 15)).as_millis() as u64;
    if parse_bool(&pkcs7_answer, false) {
        config.padding = PaddingPolicy::Pkcs7;
    }

    let client = RollcallClient::builder().with_config(config).build()?;
    let credentials = Credentials::new(username, password)?;
    let goto = goto_token(&goto_answer);

    println!("\nAttempting {}...", client.rollcall_url(goto.as_deref())?);
    let runtime = Runtime::new()?;
    let result = runtime.block_on(client.attempt_rollcall(goto.as_deref(), &credentials))?;

    println!("Outcome: {}", result.outcome);
    println!("Message: {}", result.message);
    println!("Elapsed: {:.2}s", result.elapsed.as_secs_f64());
    println!("JSON: {}", serde_json::to_string(&result)?);

    if let Some(snapshot) = client.metrics() {
        for stage in &snapshot.stages {
            println!(
                "{} -> requests: {}, failures: {}, last status: {:?}",
                stage.stage, stage.total_requests, stage.failures, stage.last_status
            );
        }
    }

    println!("Interactive test complete. Re-run with a fresh QR code as needed.");
    Ok(())
}
