//! Generated HTML pages: the default error page and directory listings.

use std::fs;
use std::io;
use std::path::Path;

use crate::http::request::encode_path;
use crate::http::response::StatusCode;

pub fn error_page(status: StatusCode) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
         \x20 <title>{code} {reason}</title>\n\
         \x20 <meta charset=\"utf-8\">\n\
         </head>\n\
         <body>\n\
         \x20 <h1>{code} {reason}</h1>\n\
         \x20 <hr>\n\
         \x20 <p>webserv</p>\n\
         </body>\n\
         </html>\n",
        code = status.as_u16(),
        reason = status.reason_phrase(),
    )
}

/// Lists `directory` as links relative to `request_path`.
///
/// Entries are sorted by name ignoring case, subdirectories end in `/`,
/// and a parent link is added unless the request path is the root.
pub fn directory_listing(request_path: &str, directory: &Path) -> io::Result<String> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            name.push('/');
        }
        entries.push(name);
    }
    entries.sort_by_key(|name| name.to_lowercase());

    let base = request_path.trim_end_matches('/');
    let title = escape(if base.is_empty() { "/" } else { request_path });

    let mut page = format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head>\n\
         \x20 <meta charset=\"UTF-8\">\n\
         \x20 <title>Index of {title}</title>\n\
         </head>\n\
         <body>\n\
         <h1>Index of {title}</h1>\n\
         <ul>\n"
    );
    let base_href = encode_path(base);
    if !base.is_empty() {
        page.push_str(&format!("<li><a href=\"{base_href}/../\">../</a></li>\n"));
    }
    for name in &entries {
        let (stem, suffix) = match name.strip_suffix('/') {
            Some(stem) => (stem, "/"),
            None => (name.as_str(), ""),
        };
        page.push_str(&format!(
            "<li><a href=\"{base_href}/{}{suffix}\">{}</a></li>\n",
            urlencoding::encode(stem),
            escape(name)
        ));
    }
    page.push_str("</ul>\n</body>\n</html>\n");
    Ok(page)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
