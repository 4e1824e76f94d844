//! The normalized error value produced for every failure mode.
//!
//! # Design
//! Network failures, non-2xx HTTP statuses, envelope-level application
//! failures and local template/binding failures all converge into one
//! [`AError`]. Codes form a closed table ([`ErrorCode`]) with one canonical
//! English phrase per code; predicates like [`AError::is_not_found`] look only
//! at the code, never at the message.
//!
//! Presentation is computed on demand: the same `AError` can be rendered in
//! any locale through [`AError::to_locale_string`]. Decoration
//! (`with_heading`, `with_detail`) returns a new value and never touches the
//! receiver.

use std::fmt;

use crate::i18n::Translator;

macro_rules! error_codes {
    ($($variant:ident = $code:literal => $phrase:literal,)*) => {
        /// Closed set of numeric error codes.
        ///
        /// HTTP-status-shaped, plus a private 490–499 range for conditions
        /// raised by this layer or by the application envelope.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum ErrorCode {
            $($variant = $code,)*
        }

        impl ErrorCode {
            /// Every code, in ascending numeric order.
            pub const ALL: &'static [ErrorCode] = &[$(ErrorCode::$variant,)*];

            /// Canonical English phrase for this code.
            pub const fn phrase(self) -> &'static str {
                match self {
                    $(ErrorCode::$variant => $phrase,)*
                }
            }

            /// Exact lookup; `None` for numbers outside the table.
            pub fn lookup(code: i64) -> Option<ErrorCode> {
                match code {
                    $($code => Some(ErrorCode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

error_codes! {
    Ok = 200 => "OK",
    Created = 201 => "Created",
    Accepted = 202 => "Accepted",
    NoContent = 204 => "No Content",
    MovedPermanently = 301 => "Moved Permanently",
    Found = 302 => "Found",
    NotModified = 304 => "Not Modified",
    BadRequest = 400 => "Bad Request",
    Unauthorized = 401 => "Unauthorized",
    PaymentRequired = 402 => "Payment Required",
    Forbidden = 403 => "Forbidden",
    NotFound = 404 => "Not Found",
    MethodNotAllowed = 405 => "Method Not Allowed",
    NotAcceptable = 406 => "Not Acceptable",
    RequestTimeout = 408 => "Request Timeout",
    Conflict = 409 => "Conflict",
    Gone = 410 => "Gone",
    PreconditionFailed = 412 => "Precondition Failed",
    PayloadTooLarge = 413 => "Payload Too Large",
    UnsupportedMediaType = 415 => "Unsupported Media Type",
    Locked = 423 => "Locked",
    TooManyRequests = 429 => "Too Many Requests",
    ClientThrow = 490 => "Client Throw",
    DeniedByDebounce = 491 => "Denied By Debounce",
    ParameterError = 492 => "Parameter Error",
    NetworkFailure = 493 => "Network Failure",
    NoRowsAvailable = 494 => "No Rows Available",
    RecordConflict = 495 => "Record Conflict",
    InternalServerError = 500 => "Internal Server Error",
    NotImplemented = 501 => "Not Implemented",
    BadGateway = 502 => "Bad Gateway",
    ServiceUnavailable = 503 => "Service Unavailable",
    GatewayTimeout = 504 => "Gateway Timeout",
}

impl ErrorCode {
    /// Numeric value of this code.
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Map any number onto the table, falling back to the class
    /// representative for unknown codes.
    pub fn from_code(code: i64) -> ErrorCode {
        if let Some(known) = ErrorCode::lookup(code) {
            return known;
        }
        match code {
            200..=299 => ErrorCode::Ok,
            300..=399 => ErrorCode::Found,
            400..=499 => ErrorCode::BadRequest,
            500..=599 => ErrorCode::InternalServerError,
            _ => ErrorCode::ClientThrow,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.phrase())
    }
}

/// Normalized error value.
///
/// Immutable after construction. Cloning is the only way to share one, and
/// every decorating method returns a fresh value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AError {
    code: ErrorCode,
    message: String,
    headings: Vec<String>,
    details: Vec<String>,
}

impl AError {
    /// Error carrying the canonical phrase of `code` as its message.
    pub fn new(code: ErrorCode) -> Self {
        Self::with_code_message(code, code.phrase())
    }

    pub fn with_code_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            headings: Vec::new(),
            details: Vec::new(),
        }
    }

    /// Error for an HTTP status the server answered with.
    pub fn from_status(status: u16) -> Self {
        Self::from_raw(i64::from(status), "")
    }

    /// Error for an envelope whose `code` does not indicate success.
    ///
    /// An empty `msg` falls back to the canonical phrase. Numbers outside the
    /// table keep their value, either in the message or as a detail.
    pub fn from_raw(code: i64, msg: &str) -> Self {
        let mapped = ErrorCode::from_code(code);
        let known = ErrorCode::lookup(code).is_some();
        match (msg.is_empty(), known) {
            (true, true) => Self::new(mapped),
            (true, false) => Self::with_code_message(mapped, format!("{} ({code})", mapped.phrase())),
            (false, true) => Self::with_code_message(mapped, msg),
            (false, false) => Self::with_code_message(mapped, msg).with_detail(format!("code {code}")),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn headings(&self) -> &[String] {
        &self.headings
    }

    pub fn details(&self) -> &[String] {
        &self.details
    }

    /// Copy of `self` with `heading` appended to the headings.
    pub fn with_heading(&self, heading: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.headings.push(heading.into());
        next
    }

    /// Copy of `self` with `detail` appended to the details.
    pub fn with_detail(&self, detail: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.details.push(detail.into());
        next
    }

    /// Copy of `self` with its message replaced.
    pub fn with_message(&self, message: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.message = message.into();
        next
    }

    fn code_in(&self, low: u16, high: u16) -> bool {
        (low..=high).contains(&self.code.as_u16())
    }

    pub fn is_ok(&self) -> bool {
        self.code_in(200, 299)
    }

    pub fn is_redirect(&self) -> bool {
        self.code_in(300, 399)
    }

    pub fn is_client_error(&self) -> bool {
        self.code_in(400, 499)
    }

    /// True for codes in the private 490–499 range.
    pub fn is_private(&self) -> bool {
        self.code_in(490, 499)
    }

    pub fn is_server_error(&self) -> bool {
        self.code_in(500, 599)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.code == ErrorCode::Unauthorized
    }

    pub fn is_forbidden(&self) -> bool {
        self.code == ErrorCode::Forbidden
    }

    /// True for HTTP 404 and for the application-level "no rows" code.
    pub fn is_not_found(&self) -> bool {
        matches!(self.code, ErrorCode::NotFound | ErrorCode::NoRowsAvailable)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.code, ErrorCode::Conflict | ErrorCode::RecordConflict)
    }

    pub fn is_denied_by_debounce(&self) -> bool {
        self.code == ErrorCode::DeniedByDebounce
    }

    /// Render through `translator`. Text without a dictionary entry is kept
    /// verbatim, so this never fails.
    pub fn to_locale_string(&self, translator: &Translator) -> String {
        self.render(|text| translator.translate(text))
    }

    fn render<F: Fn(&str) -> String>(&self, tr: F) -> String {
        let mut out = String::new();
        for heading in &self.headings {
            out.push_str(&tr(heading.as_str()));
            out.push(' ');
        }
        if self.message.is_empty() {
            out.push_str(&tr(self.code.phrase()));
        } else {
            out.push_str(&tr(&self.message));
        }
        if !self.details.is_empty() {
            let details: Vec<String> = self.details.iter().map(|d| tr(d.as_str())).collect();
            out.push_str(" (");
            out.push_str(&details.join(", "));
            out.push(')');
        }
        out
    }
}

impl fmt::Display for AError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(str::to_owned))
    }
}

impl std::error::Error for AError {}

impl From<ErrorCode> for AError {
    fn from(code: ErrorCode) -> Self {
        AError::new(code)
    }
}
