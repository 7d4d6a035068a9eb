//! The HTTP verbs a service method can be bound to.
//!
//! The router exposes one registration primitive per verb in this enum. Any other
//! verb (TRACE, CONNECT, the WebDAV family) is rejected at registration time, never
//! at request time: such requests simply fall through to the `405` fallback.

use std::fmt;
use std::str::FromStr;

use crate::error::BuildError;

/// A routable HTTP method.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
}

impl Method {
    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get     => "GET",
            Self::Post    => "POST",
            Self::Put     => "PUT",
            Self::Delete  => "DELETE",
            Self::Head    => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch   => "PATCH",
        }
    }

    /// True when an incoming request verb is this method.
    pub fn matches(self, verb: &http::Method) -> bool {
        verb.as_str() == self.as_str()
    }
}

/// Parses an uppercase method string (e.g. `"GET"`). Case-sensitive per RFC 9110 §9.1.
impl FromStr for Method {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET"     => Ok(Self::Get),
            "POST"    => Ok(Self::Post),
            "PUT"     => Ok(Self::Put),
            "DELETE"  => Ok(Self::Delete),
            "HEAD"    => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "PATCH"   => Ok(Self::Patch),
            other     => Err(BuildError::UnsupportedMethod {
                path: String::new(),
                method: other.to_owned(),
            }),
        }
    }
}

impl TryFrom<&http::Method> for Method {
    type Error = BuildError;

    fn try_from(value: &http::Method) -> Result<Self, Self::Error> {
        value.as_str().parse()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renders an `Allow` header value: verbs comma-joined in the order given.
pub(crate) fn allow_header<'a>(methods: impl IntoIterator<Item = &'a Method>) -> String {
    methods.into_iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_routable_verbs_only() {
        assert_eq!("PATCH".parse::<Method>().unwrap(), Method::Patch);
        assert!("get".parse::<Method>().is_err());
        let err = "PROPFIND".parse::<Method>().unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedMethod { ref method, .. } if method == "PROPFIND"));
    }

    #[test]
    fn converts_from_http_method() {
        assert_eq!(Method::try_from(&http::Method::DELETE).unwrap(), Method::Delete);
        assert!(Method::try_from(&http::Method::TRACE).is_err());
        assert!(Method::Get.matches(&http::Method::GET));
        assert!(!Method::Get.matches(&http::Method::HEAD));
    }

    #[test]
    fn allow_header_keeps_order() {
        assert_eq!(allow_header(&[Method::Get, Method::Post]), "GET, POST");
        assert_eq!(allow_header(&[]), "");
    }
}
