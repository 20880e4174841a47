// src/template.rs
use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tera::Tera;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:(\$)|([_A-Za-z][_A-Za-z0-9]*)|\{([_A-Za-z][_A-Za-z0-9]*)\})")
        .expect("valid placeholder regex")
});

static END_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*end[ \t]*\r?$").expect("valid end regex"));

/// Renders device helper command lines.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    pub fn new() -> Self {
        // values are shell-escaped before they reach the template
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        Self { tera }
    }

    pub fn render_str<S: AsRef<str>>(&self, s: S, ctx: &tera::Context) -> Result<String> {
        let mut t = self.tera.clone();
        t.add_raw_template("inline", s.as_ref())
            .context("add template")?;
        Ok(t.render("inline", ctx)?)
    }
}

/// `$name` / `${name}` substitution; `$$` yields a literal `$`.
/// Unknown placeholders are kept verbatim.
pub fn substitute(text: &str, vars: &BTreeMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| {
            if caps.get(1).is_some() {
                return "$".to_string();
            }
            let name = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
            match name.and_then(|n| vars.get(n)) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Blanks standalone `end` lines so a template cannot close the session early.
pub fn strip_end(text: &str) -> String {
    END_LINE.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_known_placeholders() {
        let v = vars(&[("name", "sw1")]);
        assert_eq!(substitute("hostname $name", &v), "hostname sw1");
        assert_eq!(substitute("hostname ${name}-a", &v), "hostname sw1-a");
    }

    #[test]
    fn keeps_unknown_placeholders() {
        let v = vars(&[("name", "sw1")]);
        assert_eq!(substitute("snmp $missing", &v), "snmp $missing");
        assert_eq!(substitute("cost $$5 ${other}", &v), "cost $5 ${other}");
    }

    #[test]
    fn strips_end_lines_only() {
        let conf = "hostname a\nend\ninterface Gi1/0/1\n description endpoint\n  end  \n";
        assert_eq!(
            strip_end(conf),
            "hostname a\n\ninterface Gi1/0/1\n description endpoint\n\n"
        );
    }

    #[test]
    fn renders_helper_line() {
        let mut ctx = tera::Context::new();
        ctx.insert("command", "'show version'");
        let r = Renderer::new();
        assert_eq!(
            r.render_str("dohost {{ command }}", &ctx).unwrap(),
            "dohost 'show version'"
        );
    }
}
