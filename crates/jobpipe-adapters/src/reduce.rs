//! Detail-page reduction: keep the fragments the extractor needs, drop the rest.

use std::collections::HashSet;

use jobpipe_core::{is_job_board_brand, CompanyType, JobListingCleaned, JobListingRaw};
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const WRAPPER_CLASS: &str = "cleaned-content";

/// Header block holding the company name and its category badge.
const COMPANY_BLOCK: &str = "flex flex-col md:flex-row justify-between md:items-center gap-4 mb-6";

/// Class markers of retained elements. An element is retained when its class
/// list contains every token of one marker.
const RETAINED_MARKERS: &[&str] = &[
    "text-2xl font-bold",
    "job-title",
    "breadcrumb",
    "tag",
    "html-renderer prose-content",
    "line-clamp-2",
    COMPANY_BLOCK,
];

const HEADINGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceStats {
    pub original_size: usize,
    pub cleaned_size: usize,
    pub scripts_removed: usize,
    pub styles_removed: usize,
    pub company_type: Option<CompanyType>,
    pub company_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },
}

fn selector(css: &str) -> Result<Selector, ReduceError> {
    Selector::parse(css).map_err(|e| ReduceError::Selector {
        selector: css.to_string(),
        message: e.to_string(),
    })
}

/// Reduce a detail page. Never fails: any internal error yields an empty
/// document and zeroed stats.
pub fn reduce(html: &str) -> (String, ReduceStats) {
    match try_reduce(html) {
        Ok(out) => out,
        Err(err) => {
            warn!(error = %err, "html reduction failed");
            (String::new(), ReduceStats::default())
        }
    }
}

pub fn reduce_listing(raw: &JobListingRaw) -> JobListingCleaned {
    let (reduced_html, stats) = reduce(&raw.html_snapshot);
    JobListingCleaned {
        url: raw.url.clone(),
        reduced_html,
        extracted_company_name: stats.company_name,
        extracted_company_type: stats.company_type,
    }
}

pub fn try_reduce(html: &str) -> Result<(String, ReduceStats), ReduceError> {
    let document = Html::parse_document(html);
    let mut stats = ReduceStats {
        original_size: html.len(),
        ..Default::default()
    };

    let (company_name, company_type) = company_info(&document)?;
    stats.company_name = company_name;
    stats.company_type = company_type;

    let root = document.root_element();
    for el in root.descendants().filter_map(ElementRef::wrap) {
        match el.value().name() {
            "script" => stats.scripts_removed += 1,
            "style" => stats.styles_removed += 1,
            _ => {}
        }
    }

    let mut retained = Vec::new();
    collect_retained(root, &mut retained);
    if retained.is_empty() {
        debug!("no relevant fragment in document");
        return Ok((String::new(), stats));
    }

    let fragments = serialize_fragments(&retained);
    let wrapped = format!("<div class=\"{WRAPPER_CLASS}\">{fragments}</div>");
    let out = if wrapped.len() <= html.len() {
        wrapped
    } else if fragments.len() <= html.len() {
        debug!("wrapper would outgrow the input, fragments kept bare");
        fragments
    } else {
        debug!("serialized fragments outgrow the input, nothing kept");
        String::new()
    };

    stats.cleaned_size = out.len();
    Ok((out, stats))
}

fn serialize_fragments(retained: &[ElementRef<'_>]) -> String {
    let mut out = String::new();
    for (i, el) in retained.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        write_element(*el, &mut out);
    }
    out
}

fn class_tokens<'a>(el: &ElementRef<'a>) -> HashSet<&'a str> {
    el.value().classes().collect()
}

fn is_retained(el: &ElementRef<'_>) -> bool {
    if HEADINGS.contains(&el.value().name()) {
        return true;
    }
    let classes = class_tokens(el);
    if classes.is_empty() {
        return false;
    }
    RETAINED_MARKERS
        .iter()
        .any(|marker| marker.split_whitespace().all(|t| classes.contains(t)))
}

fn is_noise(el: &ElementRef<'_>) -> bool {
    matches!(el.value().name(), "script" | "style")
}

/// Document-order walk; a retained element carries its whole subtree, so its
/// descendants are not collected again.
fn collect_retained<'a>(el: ElementRef<'a>, out: &mut Vec<ElementRef<'a>>) {
    for child in el.children().filter_map(ElementRef::wrap) {
        if is_noise(&child) {
            continue;
        }
        if is_retained(&child) {
            out.push(child);
        } else {
            collect_retained(child, out);
        }
    }
}

fn write_element(el: ElementRef<'_>, out: &mut String) {
    let name = el.value().name();
    out.push('<');
    out.push_str(name);
    let classes: Vec<&str> = el.value().classes().collect();
    if !classes.is_empty() {
        out.push_str(" class=\"");
        escape_into(&classes.join(" "), true, out);
        out.push('"');
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&name) {
        return;
    }

    for child in el.children() {
        match child.value() {
            Node::Text(text) => escape_into(text, false, out),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    if !is_noise(&child_el) {
                        write_element(child_el, out);
                    }
                }
            }
            _ => {}
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

fn collapsed_text(el: &ElementRef<'_>) -> Option<String> {
    let text = el.text().collect::<Vec<_>>().join(" ");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Company name and type straight from the page structure. The type is only
/// reported on an exact vocabulary match; the name is dropped when it is the
/// job board's own brand.
fn company_info(document: &Html) -> Result<(Option<String>, Option<CompanyType>), ReduceError> {
    let name_sel = selector(".font-semibold")?;
    let badge_sel = selector(".tag")?;

    let container = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| {
            let classes = class_tokens(el);
            COMPANY_BLOCK.split_whitespace().all(|t| classes.contains(t))
        });

    let Some(container) = container else {
        let company_type = document
            .select(&badge_sel)
            .filter_map(|b| collapsed_text(&b))
            .find_map(|t| CompanyType::from_label(&t));
        return Ok((None, company_type));
    };

    let company_name = container
        .select(&name_sel)
        .filter_map(|n| collapsed_text(&n))
        .find(|name| !is_job_board_brand(name));
    let company_type = container
        .select(&badge_sel)
        .filter_map(|b| collapsed_text(&b))
        .find_map(|t| CompanyType::from_label(&t));

    Ok((company_name, company_type))
}
