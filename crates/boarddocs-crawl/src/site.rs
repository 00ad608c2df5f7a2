//! Selectors and extraction scripts for the BoardDocs meeting pages
//!
//! `headless_chrome` returns objects as remote handles, not values, so every
//! extraction script hands its result back as a `JSON.stringify`ed string.
//! Elements reached by walking the DOM (year headers and meeting links) are
//! tagged with data attributes so later clicks can address them by selector.

use boarddocs_browser::RemotePage;
use boarddocs_core::{Result, ScrapeError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

pub const MEETINGS_TAB: &str = r##"a[href="#tab-meetings"]"##;
pub const YEAR_HEADERS: &str = "#meetings > #meeting-accordion > section.ui-accordion-header > a";
pub const MEETING_SHARE_BUTTON: &str = "#pane-content-meetings button.url";
pub const AGENDA_BUTTON: &str = "a#btn-view-agenda";
pub const ITEM_SHARE_BUTTON: &str = "#agenda-content button.url";

/// Accordion section that repeats meetings listed under their years
pub const FEATURED_YEAR: &str = "Featured";

const TAG_YEARS_SCRIPT: &str = r#"(() => JSON.stringify(Array.from(
    document.querySelectorAll(__HEADERS__),
    (a, i) => {
        a.setAttribute('data-boarddocs-year', String(i));
        return a.innerText.trim();
    })))()"#;

const TAG_MEETINGS_SCRIPT: &str = r#"(() => {
    const header = document.querySelector(__HEADER__);
    const panel = header && header.parentElement && header.parentElement.nextElementSibling;
    if (!panel) {
        return JSON.stringify([]);
    }
    return JSON.stringify(Array.from(panel.querySelectorAll(':scope > a'), (a, j) => {
        a.setAttribute('data-boarddocs-meeting', __YEAR__ + '-' + j);
        return a.innerText.trim();
    }));
})()"#;

const SHARE_URL_SCRIPT: &str = r#"(() => {
    const el = document.querySelector(__SELECTOR__);
    return JSON.stringify(el ? el.getAttribute('data-clipboard-text') : null);
})()"#;

const EXISTS_SCRIPT: &str = r#"(() => JSON.stringify(document.querySelector(__SELECTOR__) !== null))()"#;

const AGENDA_SCRIPT: &str = r#"(() => JSON.stringify(Array.from(
    document.querySelectorAll('#agenda > .wrap-category'),
    (wrap) => {
        const category = wrap.querySelector(':scope > .category');
        const order = wrap.querySelector(':scope > .category > span.order');
        const name = wrap.querySelector(':scope > .category > .category-name');
        const items = wrap.querySelectorAll(':scope > .category + .wrap-items > li.item');
        return {
            categoryId: category ? category.getAttribute('unique') : null,
            categoryOrder: order ? order.innerText.trim() : null,
            categoryName: name ? name.innerText : null,
            items: Array.from(items, (li) => {
                const itemOrder = li.querySelector(':scope > span.order');
                const itemName = li.querySelector(':scope > span.title');
                return {
                    itemId: li.getAttribute('unique'),
                    itemOrder: itemOrder ? itemOrder.innerText : null,
                    itemName: itemName ? itemName.innerText : null,
                };
            }),
        };
    })))()"#;

const ITEM_SCRIPT: &str = r#"(() => {
    const share = document.querySelector('#agenda-content button.url');
    const body = document.querySelector('#view-agenda-item');
    return JSON.stringify({
        itemUrl: share ? share.getAttribute('data-clipboard-text') : null,
        innerHtml: body ? body.innerHTML : null,
        links: Array.from(document.querySelectorAll('#agenda-content a.public-file'), (a) => ({
            order: a.getAttribute('order'),
            unique: a.getAttribute('unique'),
            href: a.href,
            text: a.innerText,
        })),
    });
})()"#;

/// A JavaScript string literal holding `text`
fn js_string(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

pub fn year_selector(index: usize) -> String {
    format!(r#"[data-boarddocs-year="{}"]"#, index)
}

pub fn meeting_selector(year: usize, index: usize) -> String {
    format!(r#"[data-boarddocs-meeting="{}-{}"]"#, year, index)
}

/// The agenda entry that opens an item
pub fn item_link_selector(item_id: &str) -> String {
    format!(
        r#"#agenda > .wrap-category > .wrap-items > li.item[unique="{}"]"#,
        item_id
    )
}

/// Present once the item pane shows this item
pub fn item_loaded_selector(item_id: &str) -> String {
    format!(
        r#"#agenda-content input[name=agenda-item-unique][value="{}"]"#,
        item_id
    )
}

pub fn tag_years_script() -> String {
    TAG_YEARS_SCRIPT.replace("__HEADERS__", &js_string(YEAR_HEADERS))
}

pub fn tag_meetings_script(year: usize) -> String {
    TAG_MEETINGS_SCRIPT
        .replace("__HEADER__", &js_string(&year_selector(year)))
        .replace("__YEAR__", &js_string(&year.to_string()))
}

pub fn share_url_script(selector: &str) -> String {
    SHARE_URL_SCRIPT.replace("__SELECTOR__", &js_string(selector))
}

pub fn exists_script(selector: &str) -> String {
    EXISTS_SCRIPT.replace("__SELECTOR__", &js_string(selector))
}

pub fn agenda_script() -> &'static str {
    AGENDA_SCRIPT
}

pub fn item_script() -> &'static str {
    ITEM_SCRIPT
}

/// Agenda section as read from the page
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCategory {
    pub category_id: Option<String>,
    pub category_order: Option<String>,
    pub category_name: Option<String>,
    pub items: Vec<RawItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    pub item_id: Option<String>,
    pub item_order: String,
    pub item_name: String,
}

/// Item pane contents as read from the page
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItemPage {
    pub item_url: Option<String>,
    pub inner_html: Option<String>,
    pub links: Vec<RawLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLink {
    pub order: Option<String>,
    pub unique: Option<String>,
    pub href: String,
    pub text: String,
}

/// Run an extraction script and decode its JSON result
pub async fn evaluate_json<T: DeserializeOwned>(
    page: &dyn RemotePage,
    script: &str,
    what: &str,
) -> Result<T> {
    let decoded = match page.evaluate(script).await? {
        Value::String(text) => serde_json::from_str(&text),
        other => serde_json::from_value(other),
    };
    decoded.map_err(|e| ScrapeError::Parse(format!("Unexpected {} payload: {}", what, e)))
}
