use http::StatusCode;
use tracing::{debug, error, trace};

use super::error_page;
use crate::container::{bind_loader, Container};
use crate::error::DispatchError;
use crate::pipeline::{Next, Valve};
use crate::server::{ErrorInfo, Request, Response};

/// Basic valve of an [`Engine`](crate::container::Engine): hands the request to the
/// mapped host.
#[derive(Debug, Default)]
pub struct EngineValve;

impl Valve for EngineValve {
    fn name(&self) -> &str {
        "EngineValve"
    }

    fn invoke(&self, req: &mut Request, res: &mut Response, _next: Next<'_>) -> Result<(), DispatchError> {
        let Some(host) = req.host() else {
            debug!(request_id = %req.request_id(), server_name = %req.server_name(), "no host matches the request");
            return res.send_error(StatusCode::BAD_REQUEST, Some("no matching host"));
        };
        host.pipeline().invoke(req, res)
    }
}

/// Basic valve of a [`Host`](crate::container::Host).
///
/// Runs the context pipeline with the context's loader bound to the thread. Errors
/// escaping the context are recorded on the request and turned into a 500, then
/// error-page processing runs.
#[derive(Debug, Default)]
pub struct HostValve;

impl Valve for HostValve {
    fn name(&self) -> &str {
        "HostValve"
    }

    fn invoke(&self, req: &mut Request, res: &mut Response, _next: Next<'_>) -> Result<(), DispatchError> {
        let Some(context) = req.context() else {
            debug!(request_id = %req.request_id(), uri = %req.request_uri(), "no context matches the request");
            return res.send_error(StatusCode::NOT_FOUND, Some("no matching context"));
        };

        let _binding = bind_loader(context.loader());
        if let Err(e) = context.pipeline().invoke(req, res) {
            if e.is_client_abort() {
                debug!(request_id = %req.request_id(), error = %e, "client aborted");
                return Ok(());
            }
            error!(request_id = %req.request_id(), context = %context.name(), error = %e, "request processing failed");
            if req.error_info().is_none() {
                let servlet_name = req.wrapper().map(|w| w.name().to_string());
                req.set_error_info(ErrorInfo {
                    class: e.class(),
                    message: e.to_string(),
                    servlet_name,
                });
            }
            if !res.is_committed() {
                res.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
            res.mark_error();
        }

        error_page::process(&context, req, res);
        Ok(())
    }
}

/// Basic valve of a [`Context`](crate::container::Context): guards the protected
/// directories and hands the request to the mapped wrapper.
#[derive(Debug, Default)]
pub struct ContextValve;

fn is_protected(path: &str) -> bool {
    ["/WEB-INF", "/META-INF"].iter().any(|dir| {
        path.as_bytes()
            .get(..dir.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(dir.as_bytes()))
            && matches!(path.as_bytes().get(dir.len()), None | Some(b'/'))
    })
}

impl Valve for ContextValve {
    fn name(&self) -> &str {
        "ContextValve"
    }

    fn invoke(&self, req: &mut Request, res: &mut Response, _next: Next<'_>) -> Result<(), DispatchError> {
        let path = req.request_path();
        if is_protected(&path) {
            trace!(request_id = %req.request_id(), path = %path, "protected path");
            return res.send_error(StatusCode::NOT_FOUND, None);
        }
        let wrapper = match req.wrapper() {
            Some(w) if !w.is_unavailable() => w,
            _ => {
                debug!(request_id = %req.request_id(), path = %path, "no available wrapper");
                return res.send_error(StatusCode::NOT_FOUND, None);
            }
        };
        wrapper.pipeline().invoke(req, res)
    }
}

#[cfg(test)]
mod tests {
    use super::is_protected;

    #[test]
    fn test_protected_paths() {
        assert!(is_protected("/WEB-INF"));
        assert!(is_protected("/web-inf/web.xml"));
        assert!(is_protected("/META-INF/MANIFEST.MF"));
        assert!(!is_protected("/WEB-INFO"));
        assert!(!is_protected("/public/WEB-INF"));
        assert!(!is_protected("/"));
        assert!(!is_protected("/xxxxxx\u{e9}"));
        assert!(!is_protected("/WEB-IN\u{e9}"));
    }
}
