use crate::db::scan::{DEFAULT_CHUNK_SIZE, scan_in_chunks};
use crate::db::{Collection, Database, hostname_of};
use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

const ANNOTATION_KEY_SEPARATOR: &str = "/#";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WipeArgs {
    pub visit_limit: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WipeSummary {
    pub deleted_pages: usize,
    pub deleted_orphan_visits: usize,
    pub capped_visits: usize,
    pub deleted_fav_icons: usize,
}

/// Root a tag hangs off. Tags share one key column for pages and annotations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagRoot {
    Page(String),
    Annotation(String),
}

impl TagRoot {
    pub fn classify(key: &str, annotation_pages: &HashMap<String, String>) -> Self {
        if annotation_pages.contains_key(key) || key.contains(ANNOTATION_KEY_SEPARATOR) {
            Self::Annotation(key.to_string())
        } else {
            Self::Page(key.to_string())
        }
    }

    /// Page kept alive by this root. An annotation key whose annotation is gone
    /// falls back to the page prefix of the key.
    pub fn page_url(self, annotation_pages: &HashMap<String, String>) -> String {
        match self {
            Self::Page(url) => url,
            Self::Annotation(key) => annotation_pages.get(&key).cloned().unwrap_or_else(|| {
                key.split_once(ANNOTATION_KEY_SEPARATOR)
                    .map(|(page, _)| page.to_string())
                    .unwrap_or(key)
            }),
        }
    }
}

/// Deletes pages nothing refers to (with their visits), caps the visit history
/// of the remaining referenced pages and sweeps favicons whose hostname lost its
/// last page. Everything happens in one transaction.
pub fn wipe_passive_data(database: &mut Database, args: WipeArgs) -> Result<WipeSummary> {
    let transaction = database.transaction()?;
    let mut summary = WipeSummary::default();

    let active_keys = collect_active_keys(&transaction)?;
    let all_keys = collect_field(&transaction, Collection::Pages, "url")?;
    let orphan_keys = all_keys
        .difference(&active_keys)
        .cloned()
        .collect::<BTreeSet<_>>();

    debug!(
        pages = all_keys.len(),
        active = active_keys.len(),
        orphans = orphan_keys.len(),
        "passive data keys collected"
    );

    {
        let mut delete_visits = transaction.prepare("DELETE FROM visits WHERE url = ?1")?;
        let mut delete_page = transaction.prepare("DELETE FROM pages WHERE url = ?1")?;

        for url in &orphan_keys {
            summary.deleted_orphan_visits += delete_visits
                .execute(params![url])
                .with_context(|| format!("Failed to delete visits of {url}"))?;
            summary.deleted_pages += delete_page
                .execute(params![url])
                .with_context(|| format!("Failed to delete page {url}"))?;
        }
    }

    let active_sorted = active_keys.iter().collect::<BTreeSet<_>>();
    for url in active_sorted {
        summary.capped_visits += cap_visits(&transaction, url, args.visit_limit)?;
    }

    if summary.deleted_pages > 0 {
        summary.deleted_fav_icons = sweep_fav_icons(&transaction)?;
    }

    transaction
        .commit()
        .context("Failed to commit passive data wipe")?;

    info!(
        deleted_pages = summary.deleted_pages,
        deleted_orphan_visits = summary.deleted_orphan_visits,
        capped_visits = summary.capped_visits,
        deleted_fav_icons = summary.deleted_fav_icons,
        "passive data wiped"
    );

    Ok(summary)
}

/// True when any visit predates `cutoff_ms`, i.e. there is old history worth wiping.
pub fn is_passive_data_removal_needed(database: &Database, cutoff_ms: i64) -> Result<bool> {
    database
        .connection()
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM visits WHERE time <= ?1)",
            params![cutoff_ms],
            |row| row.get(0),
        )
        .context("Failed to look up visits before cutoff")
}

fn collect_active_keys(conn: &Connection) -> Result<HashSet<String>> {
    let annotation_pages = collect_annotation_pages(conn)?;

    let mut active = collect_field(conn, Collection::Bookmarks, "url")?;
    active.extend(annotation_pages.values().cloned());
    active.extend(collect_field(conn, Collection::PageListEntries, "page_url")?);
    // A tag key protects itself as a page key and, when it names an annotation,
    // that annotation's page too.
    for key in collect_field(conn, Collection::Tags, "url")? {
        active.insert(TagRoot::classify(&key, &annotation_pages).page_url(&annotation_pages));
        active.insert(key);
    }

    Ok(active)
}

fn collect_annotation_pages(conn: &Connection) -> Result<HashMap<String, String>> {
    let mut pages = HashMap::new();

    scan_in_chunks(
        conn,
        Collection::Annotations.table(),
        DEFAULT_CHUNK_SIZE,
        |rows| {
            pages.extend(rows.into_iter().filter_map(|row| {
                let url = row.get("url")?.as_str()?.to_string();
                let page_url = row.get("page_url")?.as_str()?.to_string();
                Some((url, page_url))
            }));
            Ok(())
        },
    )?;

    Ok(pages)
}

fn collect_field(conn: &Connection, collection: Collection, field: &str) -> Result<HashSet<String>> {
    let mut values = HashSet::new();

    scan_in_chunks(conn, collection.table(), DEFAULT_CHUNK_SIZE, |rows| {
        values.extend(
            rows.iter()
                .filter_map(|row| row.get(field).and_then(|value| value.as_str()))
                .map(ToOwned::to_owned),
        );
        Ok(())
    })
    .with_context(|| format!("Failed to collect {field} keys of {collection}"))?;

    Ok(values)
}

fn cap_visits(conn: &Connection, url: &str, visit_limit: usize) -> Result<usize> {
    let mut times = conn
        .prepare_cached("SELECT time FROM visits WHERE url = ?1")?
        .query_map(params![url], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read visits of {url}"))?;

    if times.len() < visit_limit {
        return Ok(0);
    }

    times.sort_unstable_by(|left, right| right.cmp(left));

    let mut delete_visit = conn.prepare_cached("DELETE FROM visits WHERE url = ?1 AND time = ?2")?;
    let deleted = times
        .iter()
        .skip(visit_limit)
        .try_fold(0_usize, |count, time| {
            delete_visit
                .execute(params![url, time])
                .map(|removed| count + removed)
        })
        .with_context(|| format!("Failed to cap visits of {url}"))?;

    Ok(deleted)
}

fn sweep_fav_icons(conn: &Connection) -> Result<usize> {
    let live_hostnames = conn
        .prepare("SELECT url, hostname FROM pages")?
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read page hostnames")?
        .into_iter()
        .filter_map(|(url, hostname)| hostname.or_else(|| hostname_of(&url)))
        .collect::<HashSet<_>>();

    let stale_hostnames = collect_field(conn, Collection::FavIcons, "hostname")?
        .into_iter()
        .filter(|hostname| !live_hostnames.contains(hostname))
        .collect::<Vec<_>>();

    let mut delete_fav_icon = conn.prepare("DELETE FROM fav_icons WHERE hostname = ?1")?;
    stale_hostnames.iter().try_fold(0_usize, |count, hostname| {
        delete_fav_icon
            .execute(params![hostname])
            .map(|removed| count + removed)
            .with_context(|| format!("Failed to delete favicon of {hostname}"))
    })
}
