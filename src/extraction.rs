//! Prioritized chains of extraction strategies.
//!
//! Upstream markup drifts, so parsers are written as an ordered list of
//! `(applies, extract)` pairs. The first strategy that applies and yields at least
//! one item wins. Strategies are plain functions so each one can be tested against
//! its own fixture.

use scraper::{ElementRef, Html, Selector};

/// One way of pulling items of type `T` out of a parsed document.
pub struct ExtractionStrategy<T> {
    pub name: &'static str,
    pub applies: fn(&Html) -> bool,
    pub extract: fn(&Html) -> Vec<T>,
}

/// Output of a strategy chain: the winning strategy (if any) and its items.
#[derive(Debug)]
pub struct Extracted<T> {
    pub strategy: Option<&'static str>,
    pub items: Vec<T>,
}

pub fn run_strategies<T>(document: &Html, strategies: &[ExtractionStrategy<T>]) -> Extracted<T> {
    for strategy in strategies {
        if !(strategy.applies)(document) {
            continue;
        }
        let items = (strategy.extract)(document);
        if !items.is_empty() {
            tracing::debug!(
                "Extraction strategy '{}' yielded {} item(s)",
                strategy.name,
                items.len()
            );
            return Extracted {
                strategy: Some(strategy.name),
                items,
            };
        }
        tracing::debug!("Extraction strategy '{}' applied but found nothing", strategy.name);
    }

    Extracted {
        strategy: None,
        items: Vec::new(),
    }
}

/// Parse a selector, returning `None` for invalid input instead of panicking.
pub fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

pub fn has_match(document: &Html, css: &str) -> bool {
    selector(css)
        .map(|sel| document.select(&sel).next().is_some())
        .unwrap_or(false)
}

/// Elements matching the first selector in `guesses` that matches anything.
pub fn select_first_matching<'a>(document: &'a Html, guesses: &[&str]) -> Vec<ElementRef<'a>> {
    for css in guesses {
        if let Some(sel) = selector(css) {
            let found: Vec<ElementRef<'a>> = document.select(&sel).collect();
            if !found.is_empty() {
                return found;
            }
        }
    }
    Vec::new()
}

/// Text of the first descendant of `element` matching any of `guesses`.
pub fn text_within(element: &ElementRef<'_>, guesses: &[&str]) -> Option<String> {
    guesses.iter().find_map(|css| {
        let sel = selector(css)?;
        element
            .select(&sel)
            .map(|e| element_text(&e))
            .find(|t| !t.is_empty())
    })
}

/// Attribute of the first descendant of `element` matching any of `guesses`.
pub fn attr_within(element: &ElementRef<'_>, guesses: &[&str], attr: &str) -> Option<String> {
    guesses.iter().find_map(|css| {
        let sel = selector(css)?;
        element
            .select(&sel)
            .find_map(|e| e.value().attr(attr).map(str::to_string))
    })
}

/// Whitespace-collapsed text content of an element.
pub fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bodies of inline `<script>` tags (no `src`).
pub fn inline_scripts(document: &Html) -> Vec<String> {
    let Some(sel) = selector("script") else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter(|e| e.value().attr("src").is_none())
        .map(|e| e.text().collect::<String>())
        .filter(|body| !body.trim().is_empty())
        .collect()
}

/// First JSON array or object literal embedded in a script body, if any parses.
pub fn json_in_script(body: &str) -> Option<serde_json::Value> {
    for (start, _) in body.char_indices().filter(|(_, c)| *c == '[' || *c == '{') {
        // The stream deserializer stops after the first complete value, so trailing
        // JavaScript after the literal does not matter.
        let mut stream =
            serde_json::Deserializer::from_str(&body[start..]).into_iter::<serde_json::Value>();
        if let Some(Ok(value)) = stream.next() {
            let non_empty = match &value {
                serde_json::Value::Array(items) => !items.is_empty(),
                serde_json::Value::Object(map) => !map.is_empty(),
                _ => false,
            };
            if non_empty {
                return Some(value);
            }
        }
    }
    None
}

/// Rows of the first `<table>` matched by `table_css`, as header-keyed cell lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRows {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableRows {
    /// Index of the first header containing any of `needles` (case-insensitive).
    pub fn column(&self, needles: &[&str]) -> Option<usize> {
        self.headers.iter().position(|h| {
            let h = h.to_lowercase();
            needles.iter().any(|n| h.contains(n))
        })
    }
}

pub fn read_table(document: &Html, table_css: &str) -> Option<TableRows> {
    let table_sel = selector(table_css)?;
    let table = document.select(&table_sel).next()?;
    let header_sel = selector("th")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("td")?;

    let headers: Vec<String> = table.select(&header_sel).map(|h| element_text(&h)).collect();
    let rows: Vec<Vec<String>> = table
        .select(&row_sel)
        .map(|row| row.select(&cell_sel).map(|c| element_text(&c)).collect::<Vec<_>>())
        .filter(|cells: &Vec<String>| !cells.is_empty())
        .collect();

    Some(TableRows { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_items(document: &Html) -> Vec<String> {
        select_first_matching(document, &["li.item"])
            .iter()
            .map(element_text)
            .collect()
    }

    fn count_divs(document: &Html) -> Vec<String> {
        select_first_matching(document, &["div.card"])
            .iter()
            .map(element_text)
            .collect()
    }

    #[test]
    fn test_chain_falls_through_to_first_productive_strategy() {
        let html = Html::parse_document("<div class='card'>A</div><div class='card'>B</div>");
        let strategies = [
            ExtractionStrategy {
                name: "list",
                applies: |_| true,
                extract: count_items,
            },
            ExtractionStrategy {
                name: "cards",
                applies: |d| has_match(d, "div.card"),
                extract: count_divs,
            },
        ];

        let out = run_strategies(&html, &strategies);
        assert_eq!(out.strategy, Some("cards"));
        assert_eq!(out.items, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_chain_reports_no_strategy() {
        let html = Html::parse_document("<p>nothing</p>");
        let strategies = [ExtractionStrategy {
            name: "list",
            applies: |d| has_match(d, "li.item"),
            extract: count_items,
        }];
        let out = run_strategies(&html, &strategies);
        assert!(out.strategy.is_none());
        assert!(out.items.is_empty());
    }

    #[test]
    fn test_json_in_script_finds_assignment() {
        let body = r#"var results = [{"grantor":"DOE JOHN","doc":"20240001"}]; init();"#;
        let value = json_in_script(body).unwrap();
        assert_eq!(value[0]["grantor"], "DOE JOHN");
    }

    #[test]
    fn test_read_table_headers_and_rows() {
        let html = Html::parse_document(
            "<table id='t'><tr><th>Recording Number</th><th>Grantor</th></tr>\
             <tr><td>2024-1</td><td> DOE  JOHN </td></tr></table>",
        );
        let table = read_table(&html, "table#t").unwrap();
        assert_eq!(table.column(&["grantor"]), Some(1));
        assert_eq!(table.rows, vec![vec!["2024-1".to_string(), "DOE JOHN".to_string()]]);
    }
}
