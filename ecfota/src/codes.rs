//! Result codes reported by the DFOTA firmware.
//!
//! `+QIND: "FOTA","END",<err>` carries a [`FOTA_RESULT_CODES`] value;
//! `+QIND: "FOTA","HTTPEND",<err>` (and the FTP equivalent) carries a
//! download code.

/// `(code, meaning)` pairs.
pub type CodeTable = &'static [(i32, &'static str)];

/// Final upgrade results.
pub const FOTA_RESULT_CODES: CodeTable = &[
    (0, "Upgrade succeeded"),
    (504, "Upgrade failed"),
    (505, "Package check error"),
    (506, "Firmware MD5 check error"),
    (507, "Package version mismatch"),
    (552, "Package project name mismatch"),
    (553, "Package baseline name mismatch"),
];

/// HTTP(S) download results.
pub const HTTP_DOWNLOAD_CODES: CodeTable = &[
    (0, "Download succeeded"),
    (701, "Unknown error"),
    (702, "Timeout"),
    (703, "Busy"),
    (711, "URL error"),
    (714, "DNS error"),
    (716, "Socket connect error"),
];

/// FTP download results.
pub const FTP_DOWNLOAD_CODES: CodeTable = &[
    (0, "Download succeeded"),
    (601, "Unknown error"),
    (602, "Timeout"),
    (611, "Failed to open file"),
    (625, "Login failed"),
];

/// `+QIND` notifications emitted during an upgrade, in order.
pub const URC_OVERVIEW: &[(&str, &str)] = &[
    ("+QIND: \"FOTA\",\"HTTPSTART\"", "HTTP download started"),
    ("+QIND: \"FOTA\",\"HTTPEND\",<err>", "HTTP download finished"),
    ("+QIND: \"FOTA\",\"START\"", "Upgrade started"),
    ("+QIND: \"FOTA\",\"UPDATING\",<%>", "Upgrade progress (7%-96%)"),
    ("+QIND: \"FOTA\",\"END\",<err>", "Upgrade finished (0 = success)"),
];

fn lookup(table: CodeTable, code: i32) -> Option<&'static str> {
    table
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, desc)| *desc)
}

/// Meaning of an `END` result code.
pub fn describe_fota_result(code: i32) -> &'static str {
    lookup(FOTA_RESULT_CODES, code).unwrap_or("Unrecognized result code")
}

/// Meaning of an HTTP download code.
pub fn describe_http(code: i32) -> &'static str {
    lookup(HTTP_DOWNLOAD_CODES, code).unwrap_or("Unrecognized HTTP code")
}

/// Meaning of an FTP download code.
pub fn describe_ftp(code: i32) -> &'static str {
    lookup(FTP_DOWNLOAD_CODES, code).unwrap_or("Unrecognized FTP code")
}
