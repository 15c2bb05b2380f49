// client: blocking helpers on top of the OBEX session library
use obex::{Object, ObexError, ResponseCode, Session};
use std::io;
use std::time::{Duration, Instant};
use tracing::warn;

/// Submit `object` and pump the session until the exchange is over.
///
/// Returns the final response code, or `None` when the exchange ended
/// without one (parse error, local cancel). On timeout the request is
/// dropped locally and a `TimedOut` transport error is returned.
pub fn sync_request(
    session: &mut Session,
    object: Object,
    timeout: Duration,
) -> Result<Option<ResponseCode>, ObexError> {
    let cmd = object.cmd();
    session.request(object)?;

    let deadline = Instant::now() + timeout;
    while !session.is_idle() {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            warn!("{} timed out after {:?}", cmd, timeout);
            session.cancel_request(false)?;
            return Err(ObexError::Transport(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} got no response", cmd),
            )));
        }
        session.handle_input(Some(left))?;
    }
    Ok(session.last_response())
}
