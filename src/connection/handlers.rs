//! The seven replaceable event handlers.
//!
//! The registry lives inside the state machine, so registration and dispatch
//! are serialized by the same queue. A replacement queued while a handler
//! runs takes effect for the next event.

use crate::error::Error;
use crate::message::CloseCode;

pub(crate) type OpenHandler = Box<dyn FnMut() + Send + 'static>;
pub(crate) type BinaryHandler = Box<dyn FnMut(&[u8]) + Send + 'static>;
pub(crate) type TextHandler = Box<dyn FnMut(&str) + Send + 'static>;
pub(crate) type CloseHandler = Box<dyn FnMut(CloseCode, Option<&str>, bool) + Send + 'static>;
pub(crate) type ClosedHandler = Box<dyn FnMut() + Send + 'static>;
pub(crate) type ErrorHandler = Box<dyn FnMut(&Error) + Send + 'static>;

/// A replacement for one slot.
pub(crate) enum HandlerSlot {
    Open(OpenHandler),
    BinaryMessage(BinaryHandler),
    TextMessage(TextHandler),
    Close(CloseHandler),
    Closing(CloseHandler),
    Closed(ClosedHandler),
    Error(ErrorHandler),
}

impl HandlerSlot {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            HandlerSlot::Open(_) => "open",
            HandlerSlot::BinaryMessage(_) => "binary_message",
            HandlerSlot::TextMessage(_) => "text_message",
            HandlerSlot::Close(_) => "close",
            HandlerSlot::Closing(_) => "closing",
            HandlerSlot::Closed(_) => "closed",
            HandlerSlot::Error(_) => "error",
        }
    }
}

#[derive(Default)]
pub(crate) struct HandlerRegistry {
    open: Option<OpenHandler>,
    binary_message: Option<BinaryHandler>,
    text_message: Option<TextHandler>,
    close: Option<CloseHandler>,
    closing: Option<CloseHandler>,
    closed: Option<ClosedHandler>,
    error: Option<ErrorHandler>,
}

impl HandlerRegistry {
    pub(crate) fn set(&mut self, slot: HandlerSlot) {
        match slot {
            HandlerSlot::Open(h) => self.open = Some(h),
            HandlerSlot::BinaryMessage(h) => self.binary_message = Some(h),
            HandlerSlot::TextMessage(h) => self.text_message = Some(h),
            HandlerSlot::Close(h) => self.close = Some(h),
            HandlerSlot::Closing(h) => self.closing = Some(h),
            HandlerSlot::Closed(h) => self.closed = Some(h),
            HandlerSlot::Error(h) => self.error = Some(h),
        }
    }

    pub(crate) fn open(&mut self) {
        if let Some(h) = self.open.as_mut() {
            h();
        }
    }

    pub(crate) fn binary_message(&mut self, data: &[u8]) {
        if let Some(h) = self.binary_message.as_mut() {
            h(data);
        }
    }

    pub(crate) fn text_message(&mut self, text: &str) {
        if let Some(h) = self.text_message.as_mut() {
            h(text);
        }
    }

    pub(crate) fn close(&mut self, code: CloseCode, reason: Option<&str>, was_clean: bool) {
        if let Some(h) = self.close.as_mut() {
            h(code, reason, was_clean);
        }
    }

    pub(crate) fn closing(&mut self, code: CloseCode, reason: Option<&str>, was_clean: bool) {
        if let Some(h) = self.closing.as_mut() {
            h(code, reason, was_clean);
        }
    }

    pub(crate) fn closed(&mut self) {
        if let Some(h) = self.closed.as_mut() {
            h();
        }
    }

    pub(crate) fn error(&mut self, err: &Error) {
        if let Some(h) = self.error.as_mut() {
            h(err);
        }
    }
}
