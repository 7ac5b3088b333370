use std::convert::Infallible;
use std::io::SeekFrom;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::router::AppState;

/// How often the log file is checked for new lines once the reader hits its end.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Tail the game server's stdout log as Server-Sent Events.
///
/// Streaming starts at the current end of the file, so only lines written after the
/// client connected are sent, one `data:` event per line. The stream ends when the client
/// disconnects or the sidecar shuts down.
pub async fn stream(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let path = state.stdout_log.clone();

    let mut file = match fs::File::open(&path).await {
        Ok(file) => file,
        Err(error) => {
            warn!(path = %path.display(), error = %error, "could not open log file for streaming");
            return Err(ApiError::LogUnavailable);
        }
    };
    file.seek(SeekFrom::End(0))
        .await
        .map_err(ApiError::io("seek log file"))?;

    info!(path = %path.display(), "log stream connection opened");

    let shutdown = state.shutdown.clone();
    let mut reader = BufReader::new(file);

    let stream = async_stream::stream! {
        let mut line = Vec::new();

        loop {
            let read = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                read = reader.read_until(b'\n', &mut line) => read,
            };

            match read {
                Ok(0) => {
                    tokio::select! {
                        biased;
                        _ = shutdown.triggered() => break,
                        _ = sleep(POLL_INTERVAL) => {}
                    }
                }
                Ok(_) if line.ends_with(b"\n") => {
                    let text = String::from_utf8_lossy(&line)
                        .trim_end_matches(&['\r', '\n'][..])
                        .to_owned();
                    line.clear();
                    yield Ok::<_, Infallible>(Event::default().data(text));
                }
                // Partial line: the writer has not finished it yet.
                Ok(_) => {}
                Err(error) => {
                    warn!(error = %error, "error reading log file during stream");
                    break;
                }
            }
        }

        info!("log stream closed");
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
