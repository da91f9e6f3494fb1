//! Read random bytes for one second through the one-shot runner.

use std::time::Duration;

use iexec::run_with_output;

#[tokio::main]
async fn main() -> iexec::Result<()> {
    let output = run_with_output(Duration::from_secs(1), "cat", ["/dev/urandom"]).await?;
    if !output.stderr.is_empty() {
        eprintln!("command failed: {}", output.stderr_text());
        std::process::exit(1);
    }

    let preview: String = output.stdout.iter().take(32).map(|b| format!("{:02x}", b)).collect();
    println!(
        "read {} bytes (timed out: {}), first bytes: {}",
        output.stdout.len(),
        output.timed_out,
        preview
    );
    Ok(())
}
