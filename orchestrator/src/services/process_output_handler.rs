//! Helpers to handle node process stdout/stderr output
//!
//! Both streams are read line by line as they arrive and decoded lossily, so
//! bytes that are not UTF-8 never stop the pump. Every line goes into the
//! spec timeline tagged with the node, and through a [`FailureDetailParser`]
//! so failure detail survives even when a node only reports through its exit
//! code.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

use shared::protocol::{FailureDetail, FailureDetailParser};
use shared::{process_debug, NodeInfo, ProcessId};

use crate::core::timeline::TimelineHandle;

/// Spawn a task pumping `reader` into the timeline; it yields the failure
/// details found on the stream once the stream closes
pub fn spawn_line_pump<R>(reader: R, node: NodeInfo, timeline: TimelineHandle) -> JoinHandle<Vec<FailureDetail>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut parser = FailureDetailParser::new();
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = decode_line(&buf);
                    parser.feed(&line);
                    timeline.record(&node, &line).await;
                }
                Err(e) => {
                    process_debug!(ProcessId::current(), "Output of {} became unreadable: {}", node, e);
                    break;
                }
            }
        }

        parser.into_details()
    })
}

/// One output line without its terminator; invalid UTF-8 becomes U+FFFD
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Collect the results of the pumps, giving up on any still open after `limit`
pub async fn drain_pumps(pumps: Vec<JoinHandle<Vec<FailureDetail>>>, limit: Duration) -> Vec<FailureDetail> {
    let mut details = Vec::new();
    for mut pump in pumps {
        match tokio::time::timeout(limit, &mut pump).await {
            Ok(Ok(found)) => details.extend(found),
            Ok(Err(e)) => process_debug!(ProcessId::current(), "Output pump ended abnormally: {}", e),
            Err(_) => {
                process_debug!(ProcessId::current(), "Output pump still open after {:?}, abandoning it", limit);
                pump.abort();
            }
        }
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::file_system::RealFileSystem;
    use shared::RoleName;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_pump_records_lines_and_extracts_failures() {
        let node = NodeInfo::new(2, RoleName::new("second"), "SampleTests.Failed");
        let timeline = TimelineHandle::spawn("SampleTests.Failed", Arc::new(RealFileSystem::new()));
        let output = b"starting\n\
[Node2:second][FAIL] SampleTests.Failed\n\
[Node2:second][FAIL-EXCEPTION] Type: Error\n\
--> [Node2:second][FAIL-EXCEPTION] Message: boom\n\
--> [Node2:second][FAIL-EXCEPTION] StackTrace: \n";
        let reader = tokio_test::io::Builder::new().read(output).build();

        let pump = spawn_line_pump(reader, node, timeline.clone());
        let details = drain_pumps(vec![pump], Duration::from_secs(5)).await;

        assert_eq!(details.len(), 1);
        assert_eq!(details[0].exception_type, "Error");
        assert_eq!(details[0].message, "boom");

        let log = timeline.spec_log().await.unwrap();
        assert_eq!(log.entry_count(), 5);
    }

    #[tokio::test]
    async fn test_pump_keeps_reading_past_invalid_utf8() {
        let node = NodeInfo::new(1, RoleName::new("first"), "SampleTests.Sample");
        let timeline = TimelineHandle::spawn("SampleTests.Sample", Arc::new(RealFileSystem::new()));
        let reader = tokio_test::io::Builder::new()
            .read(b"before\n")
            .read(b"\xff\xfe bad\r\n")
            .read(b"after\n[Node1:first][FAIL-EXCEPTION] Type: Error\n")
            .read(b"tail without newline")
            .build();

        let pump = spawn_line_pump(reader, node, timeline.clone());
        let details = drain_pumps(vec![pump], Duration::from_secs(5)).await;

        assert_eq!(details.len(), 1);
        assert_eq!(details[0].exception_type, "Error");

        let log = timeline.spec_log().await.unwrap();
        assert_eq!(log.entry_count(), 5);
        assert!(log.aggregated.iter().any(|line| line.contains("\u{FFFD}\u{FFFD} bad")));
        assert!(log.aggregated.iter().any(|line| line.contains("after")));
        assert!(log.aggregated.iter().any(|line| line.contains("tail without newline")));
    }

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"plain\r\n"), "plain");
        assert_eq!(decode_line(b"no terminator"), "no terminator");
        assert_eq!(decode_line(b"a\xffb\n"), "a\u{FFFD}b");
    }
}
