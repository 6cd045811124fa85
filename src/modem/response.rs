//! # AT Responses
//!
//! Accumulated response text of one command and the small helpers used to
//! pick markers and fields out of it.
//!
//! There is no grammar here: the modem's replies are scanned for known
//! markers (`ERROR`, `ACTIVE`, `+CAOPEN: 0,0`, ...) and for `+NAME: a,b,c`
//! information lines, which is all the state machines need.

/// Generic failure marker emitted by the modem
pub const ERROR_MARKER: &str = "ERROR";

/// Response of one AT command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtResponse {
    /// Text received so far
    pub message: String,
    /// Set once the command's timeout elapsed
    pub is_finished: bool,
}

/// How a finished response should be routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// Deadline passed with no text captured
    Timeout,
    /// Text contains the failure marker
    ProtocolError,
    /// Some text arrived without a failure marker
    Completed,
}

impl AtResponse {
    /// A response whose deadline passed.
    pub fn finished(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_finished: true,
        }
    }

    /// Whether `marker` appears anywhere in the text.
    pub fn contains(&self, marker: &str) -> bool {
        self.message.contains(marker)
    }

    /// Whether no text was captured.
    pub fn is_empty(&self) -> bool {
        self.message.trim().is_empty()
    }

    /// Classifies the text for routing.
    pub fn classify(&self) -> ResponseClass {
        if self.is_empty() {
            ResponseClass::Timeout
        } else if self.contains(ERROR_MARKER) {
            ResponseClass::ProtocolError
        } else {
            ResponseClass::Completed
        }
    }

    /// Iterator over the `+NAME: ...` information lines for `name`.
    pub fn info_lines<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.message
            .lines()
            .map(str::trim)
            .filter_map(split_at_response)
            .filter(move |(prefix, _)| *prefix == name)
            .map(|(_, rest)| rest)
    }

    /// Payload of the first `+NAME: ...` line for `name`.
    pub fn info_line<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.info_lines(name).next()
    }
}

/// Splits `+NAME: rest` into `("NAME", "rest")`.
pub fn split_at_response(line: &str) -> Option<(&str, &str)> {
    if line.starts_with('+') {
        if let Some(prefix_len) = line.find(": ") {
            let prefix = &line[1..prefix_len];
            let rest = &line[prefix_len + 2..];
            return Some((prefix, rest));
        }
    }
    None
}

/// `n`-th comma separated field of an information line, trimmed.
pub fn field(rest: &str, n: usize) -> Option<&str> {
    rest.split(',').nth(n).map(str::trim)
}

/// Network registration status from an `AT+CEREG?` reply.
///
/// `+CEREG: <n>,<stat>[,...]` yields `stat`.
pub fn parse_registration_status(response: &AtResponse) -> Option<u8> {
    response
        .info_line("CEREG")
        .and_then(|rest| field(rest, 1))
        .and_then(|stat| stat.parse().ok())
}

/// First octet of the address bound to PDP context 0 from `AT+CNACT?`.
///
/// `+CNACT: 0,1,"10.160.3.17"` yields `"10"`. `"0"` means the modem has
/// not been given an address yet.
pub fn parse_address_octet(response: &AtResponse) -> Option<String> {
    response
        .info_lines("CNACT")
        .find(|rest| field(rest, 0) == Some("0"))
        .and_then(|rest| field(rest, 2))
        .map(|addr| addr.trim_matches('"'))
        .and_then(|addr| addr.split('.').next())
        .filter(|octet| !octet.is_empty())
        .map(str::to_string)
}

/// IMEI (15 digits) from an `AT+GSN` reply.
pub fn parse_imei(response: &AtResponse) -> Option<String> {
    const IMEI_LEN: usize = 15;

    response
        .message
        .lines()
        .map(str::trim)
        .find(|line| {
            line.len() >= IMEI_LEN && line.as_bytes()[..IMEI_LEN].iter().all(u8::is_ascii_digit)
        })
        .map(|line| line[..IMEI_LEN].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_at_response() {
        assert_eq!(split_at_response("+CEREG: 0,2"), Some(("CEREG", "0,2")));
        assert_eq!(split_at_response("CEREG: 0,2"), None);
        assert_eq!(split_at_response("+CEREG 0,2"), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(AtResponse::finished("").classify(), ResponseClass::Timeout);
        assert_eq!(AtResponse::finished("\r\n").classify(), ResponseClass::Timeout);
        assert_eq!(
            AtResponse::finished("AT+CNACT=0,1\r\nERROR\r\n").classify(),
            ResponseClass::ProtocolError
        );
        assert_eq!(AtResponse::finished("OK\r\n").classify(), ResponseClass::Completed);
    }

    #[test]
    fn test_registration_status_with_echo() {
        let response = AtResponse::finished("AT+CEREG?\r\r\n+CEREG: 0,5\r\n\r\nOK\r\n");
        assert_eq!(parse_registration_status(&response), Some(5));

        let response = AtResponse::finished("+CEREG: 2,3,\"1A2B\",\"01A2B3C4\",9\r\nOK");
        assert_eq!(parse_registration_status(&response), Some(3));
    }

    #[test]
    fn test_registration_status_missing() {
        assert_eq!(parse_registration_status(&AtResponse::finished("")), None);
        assert_eq!(parse_registration_status(&AtResponse::finished("ERROR")), None);
        assert_eq!(parse_registration_status(&AtResponse::finished("+CEREG: 0")), None);
    }

    #[test]
    fn test_address_octet() {
        let response = AtResponse::finished(
            "AT+CNACT?\r\r\n+CNACT: 0,1,\"10.160.3.17\"\r\n+CNACT: 1,0,\"0.0.0.0\"\r\n\r\nOK\r\n",
        );
        assert_eq!(parse_address_octet(&response).as_deref(), Some("10"));

        let response = AtResponse::finished("+CNACT: 0,0,\"0.0.0.0\"\r\nOK\r\n");
        assert_eq!(parse_address_octet(&response).as_deref(), Some("0"));

        assert_eq!(parse_address_octet(&AtResponse::finished("OK")), None);
    }

    #[test]
    fn test_imei() {
        let response = AtResponse::finished("AT+GSN\r\r\n869951031234567\r\n\r\nOK\r\n");
        assert_eq!(parse_imei(&response).as_deref(), Some("869951031234567"));

        assert_eq!(parse_imei(&AtResponse::finished("AT+GSN\r\nERROR\r\n")), None);
    }

    #[test]
    fn test_info_lines_filters_by_name() {
        let response = AtResponse::finished("+CGNSINF: 1,1\r\n+CEREG: 0,1\r\n");
        assert_eq!(response.info_line("CEREG"), Some("0,1"));
        assert_eq!(response.info_lines("CGNSINF").count(), 1);
        assert_eq!(response.info_line("CBC"), None);
    }
}
