//! Error-page processing, run by the host valve after the context pipeline.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::container::{Container, Context};
use crate::decorator::attributes::{
    ERROR_EXCEPTION_TYPE, ERROR_MESSAGE, ERROR_REQUEST_URI, ERROR_SERVLET_NAME, ERROR_STATUS_CODE,
};
use crate::filter::DispatcherType;
use crate::server::{Request, Response};
use http::StatusCode;

/// Render the matching error page, once per response.
///
/// A recorded failure selects a page by error class, then the 500 page. Otherwise an
/// error status (>= 400 reported through `send_error`) selects a page by status. The
/// page is forwarded to, or included when the response is already committed.
pub(crate) fn process(context: &Arc<Context>, req: &mut Request, res: &mut Response) {
    let info = req.error_info().cloned();
    let page = match &info {
        Some(info) => context
            .find_error_page_by_class(info.class)
            .or_else(|| context.find_error_page_by_status(StatusCode::INTERNAL_SERVER_ERROR)),
        None if res.is_error() && res.status().as_u16() >= 400 => {
            context.find_error_page_by_status(res.status())
        }
        None => return,
    };
    let Some(page) = page else {
        return;
    };
    if !res.set_error_reported() {
        return;
    }

    let status = res.status();
    let message = info
        .as_ref()
        .map(|i| i.message.clone())
        .or_else(|| res.message().map(str::to_string))
        .unwrap_or_default();
    let servlet_name = info
        .as_ref()
        .and_then(|i| i.servlet_name.clone())
        .or_else(|| req.wrapper().map(|w| w.name().to_string()));
    let request_uri = req.request_uri().to_string();

    req.set_attribute(ERROR_STATUS_CODE, Value::from(status.as_u16()));
    req.set_attribute(ERROR_MESSAGE, Value::String(message));
    req.set_attribute(ERROR_REQUEST_URI, Value::String(request_uri));
    if let Some(name) = servlet_name {
        req.set_attribute(ERROR_SERVLET_NAME, Value::String(name));
    }
    if let Some(info) = &info {
        req.set_attribute(ERROR_EXCEPTION_TYPE, Value::String(info.class.as_str().to_string()));
    }

    let Some(dispatcher) = context.request_dispatcher(&page.location) else {
        warn!(context = %context.name(), location = %page.location, "error page location maps to no servlet");
        return;
    };
    req.set_dispatcher_type(DispatcherType::Error);
    res.resume_for_error_page();
    debug!(
        request_id = %req.request_id(),
        status = status.as_u16(),
        location = %page.location,
        "rendering error page"
    );
    let result = if res.is_committed() {
        dispatcher.include(req, res)
    } else {
        dispatcher.forward(req, res)
    };
    if let Err(e) = result {
        error!(request_id = %req.request_id(), location = %page.location, error = %e, "error page failed");
    }
}
