//! Contact extraction from a rendered page.
//!
//! Everything here is a pure function of the page HTML and its URL, so the
//! crawler can run it on whatever the browser rendered and tests can run it on
//! fixtures.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde::{Serialize, Serializer};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());

// Optional country code, optional "(0)" trunk prefix, then digit groups split by space, dot or dash.
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+\d{1,3}[ .-]?)?(?:\(0\)[ .-]?)?\(?\d{1,4}\)?(?:[ .-]?\d{2,4}){2,5}").unwrap()
});

// "12 rue de la Paix, 75002 Paris" or "123 Main St, Springfield, IL 62704"
static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\d{1,4}[ ,]+[^,\n\d]{3,80},(?:[^,\n]{1,80},)?\s*(?:\d{5}[ \t]+[^\d\n,]{2,40}|[^\d\n]{2,40}\d{2,5})",
    )
    .unwrap()
});

static CONTACT_TEXT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)contact").unwrap());

static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static ANCHORS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static IMAGES: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());
static HEADER_IMAGES: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("header img, [role='banner'] img, #header img, [class*='header'] img, nav img")
        .unwrap()
});

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "fieldset", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main",
    "nav", "ol", "p", "pre", "section", "table", "tbody", "td", "th", "thead", "tr", "ul",
];
const IMAGE_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg"];
const MIN_PHONE_DIGITS: usize = 9;
const MAX_PHONE_DIGITS: usize = 15;

/// Outcome of one pattern scan: the first match, or an explicit miss.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Field {
    Found(String),
    #[default]
    NotFound,
}

impl Field {
    pub fn is_found(&self) -> bool {
        matches!(self, Field::Found(_))
    }

    pub fn as_deref(&self) -> Option<&str> {
        match self {
            Field::Found(value) => Some(value),
            Field::NotFound => None,
        }
    }

    pub fn into_option(self) -> Option<String> {
        match self {
            Field::Found(value) => Some(value),
            Field::NotFound => None,
        }
    }
}

impl From<Option<String>> for Field {
    fn from(value: Option<String>) -> Self {
        value.map(Field::Found).unwrap_or(Field::NotFound)
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Field::Found(value) => serializer.serialize_str(value),
            Field::NotFound => serializer.serialize_none(),
        }
    }
}

/// What one site yielded. `logo` is the scraped source URL, never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ContactRecord {
    pub email: Field,
    pub phone: Field,
    pub address: Field,
    pub logo: Option<String>,
}

impl ContactRecord {
    pub fn not_found() -> Self {
        Self::default()
    }

    /// A record is worth keeping only with an email or a phone number.
    pub fn has_contact(&self) -> bool {
        self.email.is_found() || self.phone.is_found()
    }
}

pub fn extract(html: &str, page_url: &str) -> ContactRecord {
    let document = Html::parse_document(html);
    let text = visible_text(&document);

    ContactRecord {
        email: extract_email(&text),
        phone: extract_phone(&text),
        address: extract_address(&text),
        logo: find_logo(&document, page_url),
    }
}

pub fn extract_email(text: &str) -> Field {
    EMAIL_RE
        .find_iter(text)
        .map(|m| m.as_str())
        // retina asset names such as logo@2x.png look like addresses
        .find(|candidate| {
            let lower = candidate.to_lowercase();
            !IMAGE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
        })
        .map(String::from)
        .into()
}

pub fn extract_phone(text: &str) -> Field {
    PHONE_RE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .find(|candidate| {
            let digits = candidate.chars().filter(char::is_ascii_digit).count();
            (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits)
        })
        .map(String::from)
        .into()
}

pub fn extract_address(text: &str) -> Field {
    ADDRESS_RE
        .find(text)
        .map(|m| m.as_str().trim().to_string())
        .into()
}

/// First same-site anchor whose text mentions "contact". `mailto:`, `tel:` and
/// `javascript:` targets are never returned since they cannot be loaded as pages.
pub fn find_contact_link(html: &str, page_url: &str) -> Option<String> {
    let base = Url::parse(page_url).ok()?;
    let document = Html::parse_document(html);

    document
        .select(&ANCHORS)
        .filter(|a| CONTACT_TEXT_RE.is_match(&a.text().collect::<String>()))
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !is_non_navigable(href))
        .filter_map(|href| base.join(href).ok())
        .find(|target| {
            matches!(target.scheme(), "http" | "https") && same_site(&base, target) && *target != base
        })
        .map(|target| target.to_string())
}

fn is_non_navigable(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    lower.is_empty()
        || lower.starts_with('#')
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("javascript:")
}

fn same_site(a: &Url, b: &Url) -> bool {
    fn bare(url: &Url) -> Option<&str> {
        url.host_str().map(|h| h.strip_prefix("www.").unwrap_or(h))
    }
    bare(a).is_some() && bare(a) == bare(b)
}

/// Rendered text of `<body>` approximating `innerText`: inline runs are joined,
/// block elements and `<br>` start a new line, whitespace is collapsed.
fn visible_text(document: &Html) -> String {
    let root = document
        .select(&BODY)
        .next()
        .unwrap_or_else(|| document.root_element());

    let mut raw = String::new();
    push_text(root, &mut raw);

    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn push_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            // source newlines are layout, not content
            out.extend(text.chars().map(|c| if c.is_whitespace() { ' ' } else { c }));
            continue;
        }
        let Some(child) = ElementRef::wrap(child) else {
            continue;
        };
        let name = child.value().name();
        if SKIPPED_ELEMENTS.contains(&name) {
            continue;
        }
        if name == "br" {
            out.push('\n');
            continue;
        }

        let block = BLOCK_ELEMENTS.contains(&name);
        if block {
            out.push('\n');
        }
        push_text(child, out);
        if block {
            out.push('\n');
        }
    }
}

/// First `<img>` whose id, class or src mentions "logo", else the first image of
/// a header-like region. Relative sources are resolved against the page URL.
pub fn find_logo(document: &Html, page_url: &str) -> Option<String> {
    let base = Url::parse(page_url).ok()?;

    let by_name = document.select(&IMAGES).find(|img| {
        image_src(img).is_some()
            && ["id", "class", "src"].iter().any(|attr| {
                img.value()
                    .attr(attr)
                    .map_or(false, |v| v.to_ascii_lowercase().contains("logo"))
            })
    });

    let img = by_name.or_else(|| document.select(&HEADER_IMAGES).find(|img| image_src(img).is_some()))?;

    let src = image_src(&img)?;
    base.join(src).ok().map(|u| u.to_string())
}

fn image_src<'a>(img: &ElementRef<'a>) -> Option<&'a str> {
    img.value()
        .attr("src")
        .or_else(|| img.value().attr("data-src"))
        .map(str::trim)
        .filter(|src| !src.is_empty() && !src.starts_with("data:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTACT_PAGE: &str = r#"
        <html><head><title>Sécurité Plus</title>
        <script>var tracking = "bot@tracker.io";</script></head>
        <body>
          <header><a href="/"><img class="site-logo" src="/img/logo.png?v=3"></a></header>
          <main>
            <h1>Contactez-nous</h1>
            <p>Email : contact@securiteplus.fr</p>
            <p>Tél : +33 6 12 34 56 78</p>
            <p>12 rue de la Paix, 75002 Paris</p>
          </main>
        </body></html>
    "#;

    #[test]
    fn test_extract_full_record() {
        let record = extract(CONTACT_PAGE, "https://www.securiteplus.fr/contact");
        assert_eq!(record.email, Field::Found("contact@securiteplus.fr".to_string()));
        assert_eq!(record.phone, Field::Found("+33 6 12 34 56 78".to_string()));
        assert_eq!(record.address, Field::Found("12 rue de la Paix, 75002 Paris".to_string()));
        assert_eq!(
            record.logo.as_deref(),
            Some("https://www.securiteplus.fr/img/logo.png?v=3")
        );
        assert!(record.has_contact());
    }

    #[test]
    fn test_script_text_is_ignored() {
        let html = r#"<html><head></head><body><script>var e = "bot@tracker.io";</script><p>Bienvenue</p></body></html>"#;
        let record = extract(html, "https://example.fr/");
        assert_eq!(record.email, Field::NotFound);
    }

    #[test]
    fn test_empty_page_yields_not_found_everywhere() {
        let record = extract("<html><body><p>Nothing here</p></body></html>", "https://example.fr/");
        assert_eq!(record, ContactRecord::not_found());
        assert!(!record.has_contact());
    }

    #[test]
    fn test_found_fields_match_their_pattern() {
        let record = extract(CONTACT_PAGE, "https://www.securiteplus.fr/contact");
        for (field, re) in [(&record.email, &*EMAIL_RE), (&record.phone, &*PHONE_RE), (&record.address, &*ADDRESS_RE)] {
            match field {
                Field::Found(value) => {
                    assert!(!value.is_empty());
                    assert!(re.is_match(value), "{} does not match {}", value, re);
                }
                Field::NotFound => {}
            }
        }
    }

    #[test]
    fn test_phone_split_across_inline_tags() {
        let record = extract("<html><body><p>Appelez le <b>04 72</b> 00 00 01</p></body></html>", "https://a.test/");
        assert_eq!(record.phone, Field::Found("04 72 00 00 01".to_string()));
    }

    #[test]
    fn test_microdata_address_spans() {
        let html = r#"<body><div itemscope itemtype="https://schema.org/PostalAddress">
            <span itemprop="streetAddress">12 rue de la Paix</span>,
            <span itemprop="postalCode">75002</span> <span itemprop="addressLocality">Paris</span>
        </div></body>"#;
        let record = extract(html, "https://a.test/");
        assert_eq!(record.address, Field::Found("12 rue de la Paix, 75002 Paris".to_string()));
    }

    #[test]
    fn test_block_elements_and_br_break_lines() {
        let html = "<body><div>Siret 123</div><div>456 789</div><p>Ligne<br>01 23 45 67 89</p></body>";
        let document = Html::parse_document(html);
        assert_eq!(visible_text(&document), "Siret 123\n456 789\nLigne\n01 23 45 67 89");
    }

    #[test]
    fn test_email_skips_retina_asset_names() {
        let field = extract_email("logo@2x.png then info@plombier-lyon.fr");
        assert_eq!(field, Field::Found("info@plombier-lyon.fr".to_string()));
    }

    #[test]
    fn test_phone_formats() {
        assert_eq!(extract_phone("Appelez le 01 23 45 67 89"), Field::Found("01 23 45 67 89".to_string()));
        assert_eq!(extract_phone("tel 06.12.34.56.78 !"), Field::Found("06.12.34.56.78".to_string()));
        assert_eq!(extract_phone("Call 555-123-4567 now"), Field::Found("555-123-4567".to_string()));
    }

    #[test]
    fn test_phone_ignores_dates_and_short_numbers() {
        assert_eq!(extract_phone("Depuis 2024-01-15, ouvert 7j/7"), Field::NotFound);
        assert_eq!(extract_phone("Code 12 34"), Field::NotFound);
    }

    #[test]
    fn test_us_style_address() {
        let field = extract_address("Visit us at 123 Main St, Springfield, IL 62704 today");
        assert_eq!(field, Field::Found("123 Main St, Springfield, IL 62704".to_string()));
    }

    #[test]
    fn test_field_serializes_as_string_or_null() {
        let record = ContactRecord {
            email: Field::Found("a@b.fr".to_string()),
            ..ContactRecord::not_found()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["email"], "a@b.fr");
        assert!(json["phone"].is_null());
        assert!(json["logo"].is_null());
    }

    #[test]
    fn test_contact_link_resolved_relative() {
        let html = r#"<body><a href="/services">Services</a><a href="/nous-contacter">Nous CONTACTER</a></body>"#;
        assert_eq!(
            find_contact_link(html, "https://plombier.fr/"),
            Some("https://plombier.fr/nous-contacter".to_string())
        );
    }

    #[test]
    fn test_contact_link_skips_mailto() {
        let html = r#"<body><a href="mailto:hello@plombier.fr">Contact</a></body>"#;
        assert_eq!(find_contact_link(html, "https://plombier.fr/"), None);

        let html = r#"<body><a href="mailto:hello@plombier.fr">Contact</a><a href="contact.html">Page contact</a></body>"#;
        assert_eq!(
            find_contact_link(html, "https://plombier.fr/fr/"),
            Some("https://plombier.fr/fr/contact.html".to_string())
        );
    }

    #[test]
    fn test_contact_link_stays_on_site() {
        let html = r#"<body><a href="https://facebook.com/plombier">Contact Facebook</a><a href="https://www.plombier.fr/contact">Contact</a></body>"#;
        assert_eq!(
            find_contact_link(html, "https://plombier.fr/"),
            Some("https://www.plombier.fr/contact".to_string())
        );
    }

    #[test]
    fn test_contact_link_none_without_match() {
        let html = r#"<body><a href="/a-propos">À propos</a></body>"#;
        assert_eq!(find_contact_link(html, "https://plombier.fr/"), None);
    }

    #[test]
    fn test_logo_falls_back_to_header_image() {
        let html = r#"<body><div class="site-header"><img src="brand.svg"></div><img src="/photo.jpg"></body>"#;
        let document = Html::parse_document(html);
        assert_eq!(
            find_logo(&document, "https://plombier.fr/agence/"),
            Some("https://plombier.fr/agence/brand.svg".to_string())
        );
    }

    #[test]
    fn test_inline_data_logo_falls_through_to_header_image() {
        let html = r#"<body><header><img class="logo" src="data:image/png;base64,AAA"><img src="/brand.png"></header></body>"#;
        let document = Html::parse_document(html);
        assert_eq!(
            find_logo(&document, "https://a.test/"),
            Some("https://a.test/brand.png".to_string())
        );
    }

    #[test]
    fn test_logo_absent() {
        let document = Html::parse_document(r#"<body><main><img src="/photo.jpg"></main></body>"#);
        assert_eq!(find_logo(&document, "https://plombier.fr/"), None);
    }
}
