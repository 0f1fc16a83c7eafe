use std::fmt;

use crate::config::types::{LocationConfig, ServerConfig};

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  \x1b[38;5;244m───────────────────────────────────────────────\x1b[0m")?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mListen:\x1b[0m      \x1b[32m{:?}\x1b[0m",
            self.listen
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mServer names:\x1b[0m \x1b[36m{}\x1b[0m",
            self.server_names.join(", ")
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mRoot:\x1b[0m        \x1b[32m{}\x1b[0m",
            self.root
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mBody limit:\x1b[0m  \x1b[33m{} KB\x1b[0m",
            self.client_max_body_size / 1024
        )?;

        if !self.error_pages.is_empty() {
            writeln!(f, "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mError pages:\x1b[0m")?;
            for (code, path) in &self.error_pages {
                writeln!(f, "    \x1b[38;5;244m{code:4}\x1b[0m → \x1b[31m{path}\x1b[0m")?;
            }
        }

        writeln!(f, "\n  \x1b[1;37mROUTING TABLE ({})\x1b[0m", self.locations.len())?;
        writeln!(f, "  \x1b[38;5;244m───────────────────────────────────────────────\x1b[0m")?;

        let mut sorted = self.locations.clone();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));

        for (idx, location) in sorted.iter().enumerate() {
            let is_last = idx == sorted.len() - 1;
            let branch = if is_last { "  └──" } else { "  ├──" };
            writeln!(f, "  \x1b[38;5;244m{branch}\x1b[0m \x1b[1;37m{}\x1b[0m", location.path)?;
            location.fmt_details(f, is_last)?;
            if !is_last {
                writeln!(f, "  \x1b[38;5;244m    │\x1b[0m")?;
            }
        }
        Ok(())
    }
}

impl LocationConfig {
    pub(crate) fn fmt_details(&self, f: &mut fmt::Formatter<'_>, is_last: bool) -> fmt::Result {
        let indent = if is_last { "     " } else { "  │  " };

        writeln!(
            f,
            "  \x1b[38;5;250m{}├─ Root:\x1b[0m      \x1b[32m{}\x1b[0m",
            indent,
            self.root.as_deref().unwrap_or("(inherited)")
        )?;
        if let Some(methods) = &self.allowed_methods {
            writeln!(
                f,
                "  \x1b[38;5;250m{}├─ Methods:\x1b[0m   \x1b[38;5;250m{}\x1b[0m",
                indent,
                methods.join(" | ")
            )?;
        }
        writeln!(
            f,
            "  \x1b[38;5;250m{}├─ Autoindex:\x1b[0m \x1b[{}m{}\x1b[0m",
            indent,
            if self.autoindex { "32" } else { "31" },
            if self.autoindex { "ON" } else { "OFF" }
        )?;

        if let Some((code, target)) = &self.redirect {
            writeln!(f, "  \x1b[38;5;250m{indent}├─ Redirect:\x1b[0m  \x1b[35m{code} → {target}\x1b[0m")?;
        }
        if let Some(ext) = &self.cgi_extension {
            writeln!(f, "  \x1b[38;5;250m{indent}└─ CGI:\x1b[0m      \x1b[38;5;208m{ext}\x1b[0m")?;
        } else {
            writeln!(f, "  \x1b[38;5;250m{indent}└─ CGI:\x1b[0m      \x1b[31mdisabled\x1b[0m")?;
        }
        Ok(())
    }
}

pub fn display_config(configs: &[ServerConfig]) {
    log::info!("server configuration dashboard ({} server blocks)", configs.len());
    for (i, server) in configs.iter().enumerate() {
        log::info!("server block {:02}\n{}", i + 1, server);
    }
}
