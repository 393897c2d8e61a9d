//! Client certificate signing request handling

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{ProvisionError, Result};
use crate::toolkit::CaToolkit;

/// File name devices store their own copy of the CSR under
pub const DEVICE_CSR_FILE: &str = "app.csr";

/// Strip carriage returns and surrounding whitespace.
pub fn sanitize(csr: &str) -> String {
    csr.replace('\r', "").trim().to_string()
}

fn common_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // CN must be the terminal component. Toolkits differ on spacing around `=`
    // and `,`; inside the value `\` escapes the next character.
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:^|,)\s*CN\s*=\s*((?:[^,\\]|\\.)*)$").expect("common name pattern is valid")
    })
}

fn app_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("app name pattern is valid"))
}

/// Extract the terminal common name from a one-line subject dump.
///
/// The value is returned unescaped and untrimmed so that every character the
/// certificate actually carries reaches the allow-list.
pub fn common_name_from_subject(subject: &str) -> Result<String> {
    let subject = subject.trim_start().trim_end_matches(['\r', '\n']);
    let subject = subject.strip_prefix("subject=").unwrap_or(subject);
    common_name_pattern()
        .captures(subject)
        .and_then(|caps| caps.get(1))
        .map(|m| unescape_name_value(m.as_str()))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ProvisionError::MalformedSubject(subject.to_string()))
}

fn unescape_name_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => unescaped.extend(chars.next()),
            c => unescaped.push(c),
        }
    }
    unescaped
}

/// App names end up in device paths and bridge arguments, so only a narrow
/// character set is accepted.
pub fn validate_app_name(name: &str) -> Result<&str> {
    if app_name_pattern().is_match(name) {
        Ok(name)
    } else {
        Err(ProvisionError::DisallowedAppName(name.to_string()))
    }
}

/// Read the application identifier out of a sanitized CSR
pub async fn extract_app_name(toolkit: &dyn CaToolkit, csr: &str) -> Result<String> {
    let subject = {
        let workdir = tempfile::tempdir()?;
        let csr_path = workdir.path().join(DEVICE_CSR_FILE);
        tokio::fs::write(&csr_path, csr).await?;
        toolkit.csr_subject(&csr_path).await?
    };
    let name = common_name_from_subject(&subject)?;
    validate_app_name(&name)?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_carriage_returns_and_whitespace() {
        let raw = "\r\n  -----BEGIN CERTIFICATE REQUEST-----\r\nabc\r\n-----END CERTIFICATE REQUEST-----\r\n\n ";
        assert_eq!(
            sanitize(raw),
            "-----BEGIN CERTIFICATE REQUEST-----\nabc\n-----END CERTIFICATE REQUEST-----"
        );
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in ["", "  a\r\nb  ", "\r\r\n", "x", " \tline1\r\nline2\r\n"] {
            let once = sanitize(raw);
            assert_eq!(sanitize(&once), once);
        }
        assert_eq!(sanitize("  abc \n"), sanitize("abc"));
        assert_eq!(sanitize("a\r\nb"), sanitize("a\nb"));
    }

    #[test]
    fn common_name_is_terminal_component() {
        assert_eq!(
            common_name_from_subject("C = US, ST = CA, O = Acme, CN = com.example.app").unwrap(),
            "com.example.app"
        );
        assert_eq!(
            common_name_from_subject("subject=C=US,O=Acme,CN=com.example.app\n").unwrap(),
            "com.example.app"
        );
        assert_eq!(
            common_name_from_subject("CN =  Spaced_App").unwrap(),
            "Spaced_App"
        );
    }

    #[test]
    fn escaped_separators_stay_in_the_value() {
        assert_eq!(
            common_name_from_subject(r"C = US, CN = x\, CN \= com.good.app").unwrap(),
            "x, CN = com.good.app"
        );
        assert_eq!(common_name_from_subject(r"CN = evil\,x").unwrap(), "evil,x");
        assert_eq!(common_name_from_subject(r"CN = app\ ").unwrap(), "app ");
        assert_eq!(common_name_from_subject("CN = app\0\n").unwrap(), "app\0");
    }

    #[test]
    fn subject_without_common_name_is_malformed() {
        for subject in ["C = US, O = Acme", "", "CN = ", "C = US, CN = app, O = Acme"] {
            assert!(
                matches!(
                    common_name_from_subject(subject),
                    Err(ProvisionError::MalformedSubject(_))
                ),
                "{subject}"
            );
        }
    }

    #[test]
    fn app_name_allow_list() {
        for ok in ["com.example.app", "Flipper-Sample", "my_app.v2", "A"] {
            assert_eq!(validate_app_name(ok).unwrap(), ok);
        }
        for bad in ["evil;rm -rf", "../etc", "a b", "app$", "app/", "名前", ""] {
            assert!(
                matches!(
                    validate_app_name(bad),
                    Err(ProvisionError::DisallowedAppName(_))
                ),
                "{bad}"
            );
        }
    }
}
