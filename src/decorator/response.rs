use http::StatusCode;

use super::LayerId;
use crate::server::Cookie;

/// A user-supplied response decorator.
///
/// Each hook sees a mutation before it reaches the layers beneath and returns
/// `false` to swallow it. A capturing decorator, for instance, copies the bytes
/// handed to [`on_write`](ResponseDecorator::on_write) and returns `false`.
pub trait ResponseDecorator: Send {
    fn on_status(&mut self, _status: StatusCode) -> bool {
        true
    }

    fn on_header(&mut self, _name: &str, _value: &str) -> bool {
        true
    }

    fn on_cookie(&mut self, _cookie: &Cookie) -> bool {
        true
    }

    fn on_write(&mut self, _bytes: &[u8]) -> bool {
        true
    }
}

/// Response layer installed by a request dispatcher.
///
/// While `included` is set, status, header, cookie and error mutators become no-ops
/// so that included content cannot alter the enclosing response. Body writes always
/// pass through.
#[derive(Debug, Clone, Copy)]
pub struct DispatchedResponse {
    included: bool,
}

impl DispatchedResponse {
    pub(crate) fn new(included: bool) -> Self {
        Self { included }
    }

    #[must_use]
    pub fn is_included(&self) -> bool {
        self.included
    }
}

pub(crate) enum ResponseLayerKind {
    Dispatch(DispatchedResponse),
    Custom(Box<dyn ResponseDecorator>),
}

/// One layer in the response decorator stack.
pub struct ResponseLayer {
    id: LayerId,
    pub(crate) kind: ResponseLayerKind,
}

/// A mutation travelling inwards through the response layers
pub(crate) enum Mutation<'a> {
    Status(StatusCode),
    Header(&'a str, &'a str),
    Cookie(&'a Cookie),
    Write(&'a [u8]),
    SendError,
}

impl ResponseLayer {
    pub(crate) fn dispatch(included: bool) -> Self {
        Self {
            id: LayerId::next(),
            kind: ResponseLayerKind::Dispatch(DispatchedResponse::new(included)),
        }
    }

    pub(crate) fn custom(decorator: Box<dyn ResponseDecorator>) -> Self {
        Self {
            id: LayerId::next(),
            kind: ResponseLayerKind::Custom(decorator),
        }
    }

    #[must_use]
    pub fn id(&self) -> LayerId {
        self.id
    }

    #[must_use]
    pub fn is_dispatch(&self) -> bool {
        matches!(self.kind, ResponseLayerKind::Dispatch(_))
    }

    #[must_use]
    pub fn as_dispatch(&self) -> Option<&DispatchedResponse> {
        match &self.kind {
            ResponseLayerKind::Dispatch(d) => Some(d),
            ResponseLayerKind::Custom(_) => None,
        }
    }

    /// `false` when this layer swallows the mutation
    pub(crate) fn admit(&mut self, mutation: &Mutation<'_>) -> bool {
        match &mut self.kind {
            ResponseLayerKind::Dispatch(d) => {
                !d.included || matches!(mutation, Mutation::Write(_))
            }
            ResponseLayerKind::Custom(decorator) => match mutation {
                Mutation::Status(status) => decorator.on_status(*status),
                Mutation::Header(name, value) => decorator.on_header(name, value),
                Mutation::Cookie(cookie) => decorator.on_cookie(cookie),
                Mutation::Write(bytes) => decorator.on_write(bytes),
                Mutation::SendError => true,
            },
        }
    }
}

impl std::fmt::Debug for ResponseLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            ResponseLayerKind::Dispatch(d) if d.included => "include",
            ResponseLayerKind::Dispatch(_) => "forward",
            ResponseLayerKind::Custom(_) => "custom",
        };
        f.debug_struct("ResponseLayer")
            .field("id", &self.id)
            .field("kind", &kind)
            .finish()
    }
}
