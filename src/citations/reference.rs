use serde::{Deserialize, Serialize};

/// A bibliographic reference from a trusted source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
}

impl Reference {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            authors: Vec::new(),
            title: title.into(),
            venue: None,
            year: None,
            url: None,
            doi: None,
        }
    }

    pub fn with_authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_doi(mut self, doi: impl Into<String>) -> Self {
        self.doi = Some(doi.into());
        self
    }

    /// Key used to de-duplicate references gathered from several lookups.
    pub fn dedup_key(&self) -> String {
        match &self.doi {
            Some(doi) => format!("doi:{}", normalize_doi(doi)),
            None => format!("title:{}", normalize_title(&self.title)),
        }
    }

    /// One-line citation in "Authors (Year). Title. Venue." form.
    pub fn formatted(&self) -> String {
        let mut out = String::new();
        if !self.authors.is_empty() {
            out.push_str(&self.authors.join(", "));
            out.push(' ');
        }
        if let Some(year) = self.year {
            out.push_str(&format!("({year}). "));
        } else if !out.is_empty() {
            out = format!("{}. ", out.trim_end());
        }
        out.push_str(&format!("{}.", self.title.trim_end_matches('.')));
        if let Some(venue) = &self.venue {
            out.push_str(&format!(" {venue}."));
        }
        if let Some(doi) = &self.doi {
            out.push_str(&format!(" doi:{doi}"));
        } else if let Some(url) = &self.url {
            out.push_str(&format!(" {url}"));
        }
        out
    }
}

/// Title key for matching: lowercase, keep only `[a-z0-9 ]`, trim.
///
/// Internal whitespace is also collapsed to single spaces, so the gaps left
/// by removed punctuation (`"Soil - Carbon"`) or by line wrapping inside a
/// bibliography entry do not prevent a match.
pub fn normalize_title(title: &str) -> String {
    let kept: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == ' ')
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase, trimmed, without a resolver prefix.
pub fn normalize_doi(doi: &str) -> String {
    let lower = doi.trim().to_lowercase();
    let stripped = ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "http://dx.doi.org/", "doi:"]
        .iter()
        .find_map(|prefix| lower.strip_prefix(prefix))
        .unwrap_or(&lower);
    stripped
        .trim()
        .trim_end_matches(['.', ',', ';'])
        .to_string()
}
