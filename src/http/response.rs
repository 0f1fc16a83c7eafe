use crate::prelude::*;

#[derive(Debug)]
pub struct HttpResponse {
    pub version: String,
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            status_code,
            status_text: status_text.to_string(),
            headers: HashMap::from([
                ("content-length".to_string(), "0".to_string()),
                ("date".to_string(), http_date_now()),
                ("server".to_string(), "origin_server".to_string()),
            ]),
            body: Vec::new(),
        }
    }

    pub fn set_header(&mut self, key: &str, value: &str) -> &mut Self {
        self.headers.insert(key.to_lowercase(), value.to_string());
        self
    }

    pub fn set_body(&mut self, body: Vec<u8>, content_type: &str) -> &mut Self {
        self.headers.insert("content-length".to_string(), body.len().to_string());
        self.headers.insert("content-type".to_string(), content_type.to_string());
        self.body = body;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut res = format!("{} {} {}\r\n", self.version, self.status_code, self.status_text).into_bytes();

        for (key, val) in &self.headers {
            let formatted_key = Self::to_pascal_case(key);
            res.extend_from_slice(format!("{formatted_key}: {val}\r\n").as_bytes());
        }
        res.extend_from_slice(b"\r\n");
        res.extend_from_slice(&self.body);
        res
    }

    pub fn to_bytes_headers_only(&self) -> Vec<u8> {
        let mut res = format!("{} {} {}\r\n", self.version, self.status_code, self.status_text);
        for (key, val) in &self.headers {
            let formatted_key = Self::to_pascal_case(key);
            res.push_str(&format!("{formatted_key}: {val}\r\n"));
        }
        res.push_str("\r\n");
        res.into_bytes()
    }

    pub fn status_text(code: u16) -> String {
        match code {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            504 => "Gateway Timeout",
            _ => "Error",
        }
        .to_string()
    }

    pub fn set_status_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.status_text = HttpResponse::status_text(code);
        self
    }

    fn to_pascal_case(s: &str) -> String {
        s.split('-')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    None => String::new(),
                    Some(f) => f.to_uppercase().collect::<String>() + chars.as_str(),
                }
            })
            .collect::<Vec<String>>()
            .join("-")
    }

    pub fn redirect(code: u16, target_url: &str) -> Self {
        let mut res = HttpResponse::new(code, &HttpResponse::status_text(code));
        res.set_header("Location", target_url).set_header("Content-Length", "0");
        res
    }
}

/// RFC 1123 date, hand-formatted from `SystemTime` — five lines doesn't
/// justify pulling in a date-formatting crate.
fn http_date_now() -> String {
    const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];

    let secs = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let days_since_epoch = secs / 86_400;
    let time_of_day = secs % 86_400;
    let (hour, minute, second) = (time_of_day / 3600, (time_of_day % 3600) / 60, time_of_day % 60);
    let weekday = DAYS[((days_since_epoch + 4) % 7) as usize]; // 1970-01-01 was a Thursday

    let mut days = days_since_epoch as i64;
    let mut year = 1970i64;
    loop {
        let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
        let days_in_year = if leap { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    let month_lengths: [i64; 12] = [31, if leap { 29 } else { 28 }, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month = 0usize;
    for (i, len) in month_lengths.iter().enumerate() {
        if days < *len {
            month = i;
            break;
        }
        days -= len;
    }
    let day_of_month = days + 1;

    format!(
        "{weekday}, {day_of_month:02} {} {year} {hour:02}:{minute:02}:{second:02} GMT",
        MONTHS[month]
    )
}

pub fn get_mime_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

pub fn generate_autoindex(path: &Path, original_url: &str) -> HttpResponse {
    let mut html = format!("<html><body><h1>Index of {original_url}</h1><ul>");
    if let Ok(entries) = path.read_dir() {
        for entry in entries.flatten() {
            if let Ok(name) = entry.file_name().into_string() {
                html.push_str(&format!(
                    "<li><a href=\"{}/{name}\">{name}</a></li>",
                    original_url.trim_end_matches('/'),
                ));
            }
        }
    }
    html.push_str("</ul></body></html>");

    let mut res = HttpResponse::new(200, "OK");
    res.set_body(html.into_bytes(), "text/html");
    res
}

/// Builds the response for an error status, preferring the vhost's
/// configured error page when one exists and is readable, falling back to a
/// generic plain-text body otherwise (§7: a missing error-page file never
/// aborts the request, it degrades to the fallback body).
pub fn handle_error(code: u16, s_cfg: Option<&Arc<ServerConfig>>) -> HttpResponse {
    let status_text = HttpResponse::status_text(code);
    let mut res = HttpResponse::new(code, &status_text);

    if let Some(cfg) = s_cfg {
        if let Some(path_str) = cfg.error_pages.get(&code) {
            let err_path = Path::new(&cfg.root).join(path_str.trim_start_matches('/'));
            if let Ok(content) = fs::read(err_path) {
                res.set_body(content, "text/html");
                return res;
            }
        }
    }

    res.set_body(format!("{code} {status_text}").into_bytes(), "text/plain");
    res
}

/// Negotiated keep-alive only ever survives onto a 2xx/3xx response (§4.5);
/// every 4xx/5xx gets `Connection: close` regardless of what was negotiated.
pub fn set_connection_header(res: &mut HttpResponse, keep_alive_negotiated: bool) {
    let keep_alive = keep_alive_negotiated && (200..400).contains(&res.status_code);
    res.set_header("connection", if keep_alive { "keep-alive" } else { "close" });
}

/// HTTP/1.1 defaults to keep-alive unless either side sends `Connection:
/// close`; HTTP/1.0 defaults to close unless the client explicitly asks for
/// `Connection: keep-alive` (§4.5).
pub fn negotiate_keep_alive(version: &str, connection_header: Option<&str>) -> bool {
    let header = connection_header.map(|v| v.to_ascii_lowercase());
    match header.as_deref() {
        Some("close") => false,
        Some("keep-alive") => true,
        _ => version != "HTTP/1.0",
    }
}
