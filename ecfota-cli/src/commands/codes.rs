//! Codes command implementation.

use {
    console::style,
    ecfota::codes::{CodeTable, FOTA_RESULT_CODES, FTP_DOWNLOAD_CODES, HTTP_DOWNLOAD_CODES, URC_OVERVIEW},
    std::fmt::Write as _,
};

fn write_table(out: &mut String, title: &str, table: CodeTable) {
    let _ = writeln!(out, "{}", style(title).bold());
    for (code, meaning) in table {
        let _ = writeln!(out, "  {code:>4}  {meaning}");
    }
    out.push('\n');
}

/// Catalogue of upgrade and download result codes plus the notification sequence.
pub(crate) fn render_codes() -> String {
    let mut out = String::new();
    write_table(&mut out, "Upgrade result (+QIND: \"FOTA\",\"END\",<err>)", FOTA_RESULT_CODES);
    write_table(&mut out, "HTTP(S) download (\"HTTPEND\",<err>)", HTTP_DOWNLOAD_CODES);
    write_table(&mut out, "FTP download (\"FTPEND\",<err>)", FTP_DOWNLOAD_CODES);

    let _ = writeln!(out, "{}", style("Upgrade notifications").bold());
    let width = URC_OVERVIEW
        .iter()
        .map(|(urc, _)| urc.len())
        .max()
        .unwrap_or(0);
    for (urc, meaning) in URC_OVERVIEW {
        let _ = writeln!(out, "  {urc:<width$}  {meaning}");
    }
    out
}

/// Codes command implementation.
pub(crate) fn cmd_codes() {
    print!("{}", render_codes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_every_code() {
        let text = render_codes();
        for (code, meaning) in FOTA_RESULT_CODES
            .iter()
            .chain(HTTP_DOWNLOAD_CODES)
            .chain(FTP_DOWNLOAD_CODES)
        {
            assert!(text.contains(&code.to_string()), "missing {code}");
            assert!(text.contains(meaning), "missing {meaning}");
        }
    }

    #[test]
    fn test_render_includes_notifications_in_order() {
        let text = render_codes();
        let start = text.find("\"START\"").unwrap();
        let updating = text.find("\"UPDATING\"").unwrap();
        let end = text.find("\"END\",<err>  ").unwrap();
        assert!(start < updating && updating < end);
    }
}
