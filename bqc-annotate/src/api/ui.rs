//! List view and rescan

use axum::{
    extract::{Query, State},
    response::{Html, Redirect},
};
use bqc_common::html::{encode_query, escape};
use serde::Deserialize;

use super::page::{layout, rating_badge};
use crate::error::ApiResult;
use crate::pagination::calculate_pagination;
use crate::queue;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: Option<usize>,
}

/// GET / - every item of the phase with its rating status
pub async fn list_page(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Html<String>> {
    let items = state.items().await;
    let snapshot = state.snapshot().await?;
    let progress = queue::progress(&items, &snapshot);
    let pagination = calculate_pagination(items.len(), query.page.unwrap_or(1), state.page_size);

    let mut rows = String::new();
    for (idx, item) in items[pagination.range(items.len())].iter().enumerate() {
        let key = &item.item.key;
        let record = snapshot.get(key);
        rows.push_str(&format!(
            r#"
        <tr>
            <td>{n}</td>
            <td>{subject}</td>
            <td>{session}</td>
            <td><a href="/review?item={href}">{scan}</a></td>
            <td>{rating}</td>
            <td>{annotation}</td>
        </tr>"#,
            n = pagination.offset + idx + 1,
            subject = escape(&key.subject),
            session = escape(key.session_label()),
            href = encode_query(&key.scan),
            scan = escape(&key.scan),
            rating = rating_badge(record.map(|r| r.rating)),
            annotation = record.map(|r| escape(&r.annotation)).unwrap_or_default(),
        ));
    }

    let mut nav = String::new();
    if pagination.page > 1 {
        nav.push_str(&format!(r#"<a href="/?page={}">&laquo; Previous</a>"#, pagination.page - 1));
    }
    if pagination.page < pagination.total_pages {
        nav.push_str(&format!(r#"<a href="/?page={}">Next &raquo;</a>"#, pagination.page + 1));
    }

    let body = format!(
        r#"
    <h1>{title}</h1>
    <p>
        <strong>{rated}</strong> of <strong>{total}</strong> rated
        (pass {pass}, fail {fail}, uncertain {uncertain}; {unrated} unrated)
    </p>
    <p>
        <a class="button" href="/next">Resume review</a>
        <form method="post" action="/rescan" style="display:inline">
            <button class="button" type="submit">Rescan</button>
        </form>
    </p>
    <table>
        <tr><th>#</th><th>Subject</th><th>Session</th><th>Scan</th><th>Rating</th><th>Annotation</th></tr>{rows}
    </table>
    <nav>{nav} <span>Page {page} of {pages}</span></nav>
"#,
        title = escape(state.source.title()),
        rated = progress.rated,
        total = progress.total,
        pass = progress.pass,
        fail = progress.fail,
        uncertain = progress.uncertain,
        unrated = progress.unrated,
        rows = rows,
        nav = nav,
        page = pagination.page,
        pages = pagination.total_pages.max(1),
    );

    Ok(Html(layout(state.source.title(), &body)))
}

/// POST /rescan - refresh the item snapshot, then back to the list
pub async fn rescan(State(state): State<AppState>) -> ApiResult<Redirect> {
    state.rescan().await?;
    Ok(Redirect::to("/"))
}
