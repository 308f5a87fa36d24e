use scraper::{Html, Selector};
use tokio::task::spawn_blocking;

use crate::{Error, Result};

const RECORD_LINK_PREFIX: &str = "/cgi/cbook.cgi?ID=";

/// Extracts the record ids linked from a search result listing.
/// Ids come back in document order, each once. A page without record links
/// yields an empty `Vec`.
pub(crate) async fn parse_record_ids(html: String) -> Result<Vec<String>> {
    let ids = spawn_blocking(move || -> Result<Vec<String>> {
        let doc = Html::parse_document(&html);
        let link_selector = create_selector("a[href]")?;

        let mut ids: Vec<String> = Vec::new();
        for link in doc.select(&link_selector) {
            let Some(id) = link.value().attr("href").and_then(record_id_from_href) else {
                continue;
            };
            if !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_owned());
            }
        }
        Ok(ids)
    })
    .await??;

    Ok(ids)
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseMissingSelector(sel_str.into()))
}

/// `/cgi/cbook.cgi?ID=C7732185&Units=SI` -> `C7732185`. Links without a
/// following parameter aren't record links.
fn record_id_from_href(href: &str) -> Option<&str> {
    let rest = href.strip_prefix(RECORD_LINK_PREFIX)?;
    let (id, _) = rest.split_once('&')?;
    (!id.is_empty()).then_some(id)
}
