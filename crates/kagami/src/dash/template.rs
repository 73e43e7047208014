use std::sync::LazyLock;

use regex::{Captures, Regex};

// Identifiers of a SegmentTemplate@media or @initialization string. Only the
// `%0[width]d` format tag is allowed by DASH-IF IOP, and `$$` is an escaped `$`.
//
// Example template: "$RepresentationID$/$Number%06d$.m4s"
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:(RepresentationID|Number|Time|Bandwidth)(?:%0(\d+)d)?)?\$").unwrap()
});

/// Values substituted into a segment url template.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    pub representation_id: Option<String>,
    pub bandwidth: Option<u64>,
    pub number: Option<u64>,
    pub time: Option<u64>,
}

impl TemplateVars {
    pub fn new(representation_id: Option<String>, bandwidth: Option<u64>) -> Self {
        Self {
            representation_id,
            bandwidth,
            ..Default::default()
        }
    }

    pub fn number(&mut self, number: u64) -> &mut Self {
        self.number = Some(number);
        self
    }

    pub fn time(&mut self, time: u64) -> &mut Self {
        self.time = Some(time);
        self
    }

    fn value(&self, identifier: &str) -> Option<String> {
        match identifier {
            "RepresentationID" => self.representation_id.clone(),
            "Number" => self.number.map(|n| n.to_string()),
            "Time" => self.time.map(|t| t.to_string()),
            "Bandwidth" => self.bandwidth.map(|b| b.to_string()),
            _ => None,
        }
    }

    /// Expand every known identifier in `template`. Unknown or unset identifiers
    /// are left as they are.
    pub fn resolve(&self, template: &str) -> String {
        TEMPLATE_REGEX
            .replace_all(template, |caps: &Captures| {
                let Some(identifier) = caps.get(1) else {
                    return "$".to_string();
                };
                let Some(value) = self.value(identifier.as_str()) else {
                    return caps[0].to_string();
                };
                match caps.get(2).and_then(|w| w.as_str().parse::<usize>().ok()) {
                    Some(width) => format!("{value:0>width$}"),
                    None => value,
                }
            })
            .into_owned()
    }
}
