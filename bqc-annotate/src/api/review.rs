//! Item review page, rating submission and resume

use axum::{
    extract::{Query, State},
    response::{Html, Redirect},
    Form,
};
use bqc_common::html::{encode_query, escape};
use bqc_common::source::ReviewItem;
use bqc_common::Rating;
use serde::Deserialize;
use tracing::debug;

use super::page::{layout, rating_badge};
use crate::error::{ApiError, ApiResult};
use crate::queue;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ReviewQuery {
    pub item: String,
}

/// Rating form fields
#[derive(Debug, Deserialize)]
pub struct ReviewForm {
    #[serde(default)]
    pub item: String,
    #[serde(default)]
    pub rating: String,
    #[serde(default)]
    pub annotation: String,
}

fn review_url(item: &ReviewItem) -> String {
    format!("/review?item={}", encode_query(&item.item.key.scan))
}

/// GET /review?item=<scan>
pub async fn review_page(
    State(state): State<AppState>,
    Query(query): Query<ReviewQuery>,
) -> ApiResult<Html<String>> {
    let items = state.items().await;
    let pos = items
        .iter()
        .position(|i| i.item.key.scan == query.item)
        .ok_or_else(|| ApiError::NotFound(format!("item {}", query.item)))?;
    let item = &items[pos];
    let key = &item.item.key;
    let snapshot = state.snapshot().await?;
    let record = snapshot.get(key);

    let mut images = String::new();
    for artifact in &item.artifacts {
        if artifact.present {
            images.push_str(&format!(
                r#"
    <h3>{label}</h3>
    <img class="montage" src="/artifacts/{url}" alt="{label}">"#,
                label = escape(&artifact.label),
                url = escape(&encode_query(&artifact.url)),
            ));
        } else {
            images.push_str(&format!(
                r#"
    <h3>{}</h3>
    <p class="missing">Not rendered yet</p>"#,
                escape(&artifact.label),
            ));
        }
    }

    let stats = match &item.stats {
        Some(s) => format!(
            r#"<table style="width:auto">
        <tr><th>mean</th><th>median</th><th>min</th><th>max</th><th>std</th></tr>
        <tr><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td></tr>
    </table>"#,
            s.mean, s.median, s.min, s.max, s.std
        ),
        None => r#"<p class="missing">No intensity statistics</p>"#.to_string(),
    };

    let current = record.map(|r| r.rating);
    let mut choices = String::new();
    for rating in Rating::ALL {
        choices.push_str(&format!(
            r#"
        <label><input type="radio" name="rating" value="{0}"{1}> {0}</label>"#,
            rating.as_str(),
            if current == Some(rating) { " checked" } else { "" },
        ));
    }

    let mut nav = String::from(r#"<a href="/">All items</a>"#);
    if pos > 0 {
        nav.push_str(&format!(r#"<a href="{}">&laquo; Previous</a>"#, review_url(&items[pos - 1])));
    }
    if pos + 1 < items.len() {
        nav.push_str(&format!(r#"<a href="{}">Next &raquo;</a>"#, review_url(&items[pos + 1])));
    }

    let body = format!(
        r#"
    <nav>{nav}</nav>
    <h1>{scan}</h1>
    <p>Item {n} of {total} &middot; subject {subject} &middot; session {session} &middot; {modality} &middot; current rating {badge}</p>
    {stats}
    <form method="post" action="/review">
        <input type="hidden" name="item" value="{item}">
        <p>{choices}
        </p>
        <p><textarea name="annotation" rows="3" cols="80" placeholder="Notes">{annotation}</textarea></p>
        <p><button class="button" type="submit">Save and next</button></p>
    </form>
    {images}
"#,
        nav = nav,
        scan = escape(&key.scan),
        n = pos + 1,
        total = items.len(),
        subject = escape(&key.subject),
        session = escape(key.session_label()),
        modality = escape(&key.modality),
        badge = rating_badge(current),
        stats = stats,
        item = escape(&key.scan),
        choices = choices,
        annotation = record.map(|r| escape(&r.annotation)).unwrap_or_default(),
        images = images,
    );

    Ok(Html(layout(&format!("Review {}", key.scan), &body)))
}

/// POST /review - upsert the rating, then go to the next unrated item
pub async fn submit_review(
    State(state): State<AppState>,
    Form(form): Form<ReviewForm>,
) -> ApiResult<Redirect> {
    if form.rating.trim().is_empty() {
        return Err(ApiError::BadRequest("rating is required".to_string()));
    }
    let rating: Rating = form
        .rating
        .parse()
        .map_err(|e: bqc_common::Error| ApiError::BadRequest(e.to_string()))?;

    let items = state.items().await;
    let key = queue::find_by_scan(&items, &form.item)
        .map(|i| i.item.key.clone())
        .ok_or_else(|| ApiError::NotFound(format!("item {}", form.item)))?;

    state.record(key.clone(), rating, form.annotation).await?;

    let snapshot = state.snapshot().await?;
    match queue::next_unrated_after(&items, &snapshot, &key) {
        Some(next) => Ok(Redirect::to(&review_url(next))),
        None => {
            debug!("All items rated");
            Ok(Redirect::to("/"))
        }
    }
}

/// GET /next - first unrated item, or the list when review is complete
pub async fn next_unrated(State(state): State<AppState>) -> ApiResult<Redirect> {
    let items = state.items().await;
    let snapshot = state.snapshot().await?;
    Ok(match queue::first_unrated(&items, &snapshot) {
        Some(item) => Redirect::to(&review_url(item)),
        None => Redirect::to("/"),
    })
}
