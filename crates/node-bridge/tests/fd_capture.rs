//! Capture of the real stdout and stderr descriptors.
//!
//! Lives in its own test binary with a single test: redirecting fd 1 and
//! fd 2 affects every thread in the process.

#![cfg(unix)]

use std::io::Write;
use std::time::Duration;

use node_bridge::capture::LogCapture;
use node_bridge::line_channel;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

/// Collect relayed lines up to and including the first containing `marker`.
async fn collect_until(lines: &mut UnboundedReceiver<String>, marker: &str) -> Vec<String> {
    let mut seen = Vec::new();
    let _ = timeout(Duration::from_secs(2), async {
        while let Some(line) = lines.recv().await {
            let done = line.contains(marker);
            seen.push(line);
            if done {
                break;
            }
        }
    })
    .await;
    seen
}

/// True once the relay thread has hung up its end of the channel.
async fn relay_ended(lines: &mut UnboundedReceiver<String>) -> bool {
    timeout(Duration::from_secs(2), async {
        while lines.recv().await.is_some() {}
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_capture_relays_stdio_and_restores() {
    // Written through the handles, not print!, which the test harness intercepts
    let (sink, mut lines) = line_channel();
    let capture = LogCapture::install(sink, false).unwrap();
    writeln!(std::io::stdout(), "[NODE] stdout marker").unwrap();
    std::io::stdout().flush().unwrap();
    writeln!(std::io::stderr(), "  [NODE] stderr marker  ").unwrap();
    let seen = collect_until(&mut lines, "stderr marker").await;
    capture.restore();
    let ended = relay_ended(&mut lines).await;

    // Assert only after restore so failures reach the terminal
    assert!(seen.iter().any(|l| l == "[NODE] stdout marker"), "{:?}", seen);
    assert!(seen.iter().any(|l| l == "[NODE] stderr marker"), "{:?}", seen);
    assert!(ended, "relay should end once stdio is restored");

    // Dropping the capture, as an early error return does, restores too
    let (sink, mut lines) = line_channel();
    let capture = LogCapture::install(sink, false).unwrap();
    writeln!(std::io::stderr(), "Error: address in use").unwrap();
    let seen = collect_until(&mut lines, "address in use").await;
    drop(capture);
    let ended = relay_ended(&mut lines).await;

    assert!(seen.iter().any(|l| l == "Error: address in use"), "{:?}", seen);
    assert!(ended, "relay should end once the capture is dropped");

    writeln!(std::io::stderr(), "stderr is back on the terminal").unwrap();
}
