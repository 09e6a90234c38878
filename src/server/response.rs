use http::StatusCode;
use std::sync::Arc;
use tracing::debug;

use super::{Cookie, HeaderVec, OutputSink};
use crate::decorator::{
    dispatch_insertion_index, remove_by_id, LayerId, Mutation, ResponseDecorator, ResponseLayer,
};
use crate::error::DispatchError;

/// Default output buffer size in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 0x2000;

/// Container-level response.
///
/// Body bytes are buffered until the buffer fills or the response is flushed, at which
/// point the response becomes committed and the bytes go to the [`OutputSink`]. Without
/// a sink, committed bytes are retained and readable through [`Response::body`].
///
/// Every mutation first travels through the decorator layers (outermost first); a layer
/// may swallow it. See [`crate::decorator`].
pub struct Response {
    status: StatusCode,
    message: Option<String>,
    headers: HeaderVec,
    cookies: Vec<Cookie>,
    buffer: Vec<u8>,
    buffer_size: usize,
    sink: Option<Box<dyn OutputSink>>,
    sent: Vec<u8>,
    committed: bool,
    suspended: bool,
    finished: bool,
    error: bool,
    error_reported: bool,
    layers: Vec<ResponseLayer>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    #[must_use]
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            status: StatusCode::OK,
            message: None,
            headers: HeaderVec::new(),
            cookies: Vec::new(),
            buffer: Vec::with_capacity(buffer_size.min(DEFAULT_BUFFER_SIZE)),
            buffer_size,
            sink: None,
            sent: Vec::new(),
            committed: false,
            suspended: false,
            finished: false,
            error: false,
            error_reported: false,
            layers: Vec::new(),
        }
    }

    /// Send committed bytes to `sink` instead of retaining them
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// `false` when a decorator layer swallows the mutation
    fn admit(&mut self, mutation: &Mutation<'_>) -> bool {
        for layer in self.layers.iter_mut().rev() {
            if !layer.admit(mutation) {
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------ status/head

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Message passed to the last `send_error`
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Set the status. Ignored once committed or while an include is active.
    pub fn set_status(&mut self, status: StatusCode) {
        if self.committed || !self.admit(&Mutation::Status(status)) {
            return;
        }
        self.status = status;
    }

    /// Replace every value of `name` with `value`
    pub fn set_header(&mut self, name: &str, value: &str) {
        if self.committed || !self.admit(&Mutation::Header(name, value)) {
            return;
        }
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value.to_string()));
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        if self.committed || !self.admit(&Mutation::Header(name, value)) {
            return;
        }
        self.headers.push((Arc::from(name), value.to_string()));
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderVec {
        &self.headers
    }

    pub fn add_cookie(&mut self, cookie: Cookie) {
        if self.committed || !self.admit(&Mutation::Cookie(&cookie)) {
            return;
        }
        self.cookies.push(cookie);
    }

    #[must_use]
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    // ------------------------------------------------------------------- body

    /// Append body bytes, committing the response when the buffer fills.
    ///
    /// Writes after [`finish`](Response::finish) or while suspended are dropped.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), DispatchError> {
        if self.finished || self.suspended || !self.admit(&Mutation::Write(bytes)) {
            return Ok(());
        }
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() >= self.buffer_size {
            self.flush_buffer()?;
        }
        Ok(())
    }

    pub fn write_str(&mut self, text: &str) -> Result<(), DispatchError> {
        self.write(text.as_bytes())
    }

    /// Commit and push buffered bytes to the sink
    pub fn flush_buffer(&mut self) -> Result<(), DispatchError> {
        self.committed = true;
        if self.buffer.is_empty() {
            return Ok(());
        }
        let bytes = std::mem::take(&mut self.buffer);
        match self.sink.as_mut() {
            Some(sink) => sink
                .write_all(&bytes)
                .map_err(DispatchError::ClientAbort)?,
            None => self.sent.extend_from_slice(&bytes),
        }
        Ok(())
    }

    /// Bytes committed so far followed by the uncommitted buffer
    #[must_use]
    pub fn body(&self) -> Vec<u8> {
        let mut body = self.sent.clone();
        body.extend_from_slice(&self.buffer);
        body
    }

    /// Body as UTF-8, lossy
    #[must_use]
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body()).into_owned()
    }

    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    // ------------------------------------------------------------------ state

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Mark the response committed without writing anything
    pub fn set_committed(&mut self) {
        self.committed = true;
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// `true` after `send_error`
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Flag an error without discarding output, used when a failure escapes a handler.
    pub(crate) fn mark_error(&mut self) {
        self.error = true;
    }

    /// Marks the error status as handled; returns `false` if it already was.
    pub fn set_error_reported(&mut self) -> bool {
        !std::mem::replace(&mut self.error_reported, true)
    }

    #[must_use]
    pub fn is_error_reported(&self) -> bool {
        self.error_reported
    }

    /// Discard buffered body bytes, keeping status and headers.
    pub fn reset_buffer(&mut self) -> Result<(), DispatchError> {
        if self.committed {
            return Err(DispatchError::illegal_state(
                "cannot reset buffer after response has been committed",
            ));
        }
        self.buffer.clear();
        Ok(())
    }

    /// Discard status, headers, cookies and buffered body bytes.
    pub fn reset(&mut self) -> Result<(), DispatchError> {
        if self.committed {
            return Err(DispatchError::illegal_state(
                "cannot reset response after it has been committed",
            ));
        }
        self.status = StatusCode::OK;
        self.message = None;
        self.headers.clear();
        self.cookies.clear();
        self.buffer.clear();
        Ok(())
    }

    /// Report an error status. The body is discarded and the response suspended until
    /// error-page processing resumes it. A no-op inside an include.
    pub fn send_error(&mut self, status: StatusCode, message: Option<&str>) -> Result<(), DispatchError> {
        if !self.admit(&Mutation::SendError) {
            return Ok(());
        }
        if self.committed {
            return Err(DispatchError::illegal_state(
                "cannot send error after response has been committed",
            ));
        }
        self.status = status;
        self.message = message.map(str::to_string);
        self.error = true;
        self.buffer.clear();
        self.suspended = true;
        Ok(())
    }

    /// Resume output for error-page rendering after `send_error`
    pub(crate) fn resume_for_error_page(&mut self) {
        self.suspended = false;
        if !self.committed {
            self.buffer.clear();
        }
    }

    /// Flush everything and close the response for further writing.
    pub fn finish(&mut self) -> Result<(), DispatchError> {
        if self.finished {
            return Ok(());
        }
        self.suspended = false;
        let result = self.flush_buffer().and_then(|()| match self.sink.as_mut() {
            Some(sink) => sink.flush().map_err(DispatchError::ClientAbort),
            None => Ok(()),
        });
        self.finished = true;
        if let Err(e) = &result {
            debug!(error = %e, "response finish failed");
        }
        result
    }

    // ----------------------------------------------------------------- layers

    pub fn push_decorator(&mut self, decorator: Box<dyn ResponseDecorator>) -> LayerId {
        let layer = ResponseLayer::custom(decorator);
        let id = layer.id();
        self.layers.push(layer);
        id
    }

    pub fn remove_layer(&mut self, id: LayerId) -> Option<ResponseLayer> {
        remove_by_id(&mut self.layers, id, ResponseLayer::id)
    }

    /// Layer identities, innermost first
    #[must_use]
    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(ResponseLayer::id).collect()
    }

    #[must_use]
    pub fn layers(&self) -> &[ResponseLayer] {
        &self.layers
    }

    /// `true` while the outermost dispatch layer belongs to an include
    #[must_use]
    pub fn is_included(&self) -> bool {
        self.layers
            .iter()
            .rev()
            .find_map(ResponseLayer::as_dispatch)
            .is_some_and(|d| d.is_included())
    }

    pub(crate) fn insert_dispatch_layer(&mut self, included: bool) -> LayerId {
        let layer = ResponseLayer::dispatch(included);
        let id = layer.id();
        let index = dispatch_insertion_index(&self.layers, ResponseLayer::is_dispatch);
        self.layers.insert(index, layer);
        id
    }

    /// Reset for reuse. The sink is kept.
    pub fn recycle(&mut self) {
        let sink = self.sink.take();
        *self = Response::with_buffer_size(self.buffer_size);
        self.sink = sink;
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("committed", &self.committed)
            .field("buffered", &self.buffer.len())
            .field("layers", &self.layers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_commits_when_full() {
        let mut res = Response::with_buffer_size(4);
        res.write(b"ab").unwrap();
        assert!(!res.is_committed());
        res.write(b"cd").unwrap();
        assert!(res.is_committed());
        assert_eq!(res.body(), b"abcd");
        assert!(res.reset_buffer().is_err());
    }

    #[test]
    fn test_include_layer_swallows_head_mutations() {
        let mut res = Response::new();
        let id = res.insert_dispatch_layer(true);
        res.set_status(StatusCode::NOT_FOUND);
        res.set_header("X-A", "1");
        res.write(b"body").unwrap();
        res.send_error(StatusCode::INTERNAL_SERVER_ERROR, None).unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.header("X-A").is_none());
        assert!(!res.is_error());
        res.remove_layer(id);
        assert_eq!(res.body(), b"body");
    }

    #[test]
    fn test_finish_closes_output() {
        let mut res = Response::new();
        res.write(b"a").unwrap();
        res.finish().unwrap();
        res.write(b"b").unwrap();
        assert_eq!(res.body(), b"a");
        assert!(res.is_committed());
    }
}
