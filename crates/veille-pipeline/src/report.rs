//! Static HTML report rendered from the full store after each run.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use veille_core::JobRecord;
use veille_store::JobMap;

/// Postings at or above this score make the report body.
const RELEVANT_SCORE: u8 = 7;
const EXCELLENT_SCORE: u8 = 8;
const MAX_REPORT_CARDS: usize = 20;

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn score_class(score: u8) -> &'static str {
    if score >= EXCELLENT_SCORE {
        "high"
    } else if score >= RELEVANT_SCORE {
        "medium"
    } else {
        "low"
    }
}

fn push_points_section(html: &mut String, heading: &str, points: &[String]) {
    html.push_str(&format!("<div class=\"points-section\"><h4>{heading}</h4><ul>"));
    for point in points {
        html.push_str(&format!("<li>{}</li>", escape_html(point)));
    }
    html.push_str("</ul></div>");
}

fn push_job_card(html: &mut String, record: &JobRecord) {
    let Some(analysis) = &record.analysis else {
        return;
    };
    html.push_str(&format!(
        "<div class=\"job-card\">\
         <div class=\"job-header\"><div>\
         <div class=\"job-title\">{title}</div>\
         <div class=\"job-company\">{company}</div>\
         <div class=\"job-location\">{location}</div>\
         </div><div class=\"score-badge {class}\">{score}/10</div></div>\
         <div class=\"verdict\">{verdict}</div>\
         <div class=\"points\">",
        title = escape_html(&record.title),
        company = escape_html(&record.company),
        location = escape_html(&record.location),
        class = score_class(analysis.score),
        score = analysis.score,
        verdict = escape_html(&analysis.verdict),
    ));
    push_points_section(html, "Points forts", &analysis.points_forts);
    push_points_section(html, "Points faibles", &analysis.points_faibles);
    html.push_str(&format!(
        "</div><div class=\"recommendation\"><strong>Recommandation :</strong> {}</div>",
        escape_html(&analysis.recommandation)
    ));
    if !record.link.is_empty() {
        html.push_str(&format!(
            "<a class=\"job-link\" href=\"{}\" target=\"_blank\">Voir l'offre ({})</a>",
            escape_html(&record.link),
            record.source
        ));
    }
    html.push_str("</div>");
}

/// Renders the whole store, ranked by score descending (id as tiebreak so the
/// output is stable across runs with identical data).
pub fn render_html(records: &JobMap, generated_at: DateTime<Utc>) -> String {
    let mut ranked: Vec<&JobRecord> = records.values().collect();
    ranked.sort_by(|a, b| b.score().cmp(&a.score()).then_with(|| a.id.cmp(&b.id)));

    let relevant = ranked.iter().filter(|r| r.score() >= RELEVANT_SCORE).count();
    let excellent = ranked.iter().filter(|r| r.score() >= EXCELLENT_SCORE).count();

    let mut html = String::new();
    html.push_str(
        "<!DOCTYPE html>\n<html lang=\"fr\">\n<head>\n<meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>Veille Alternance</title>\n<style>\n\
         * { margin: 0; padding: 0; box-sizing: border-box; }\n\
         body { font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; background: #667eea; padding: 20px; }\n\
         .container { max-width: 1200px; margin: 0 auto; }\n\
         .header, .stat-card, .job-card { background: white; border-radius: 10px; padding: 20px; margin-bottom: 15px; }\n\
         .stats { display: grid; grid-template-columns: repeat(auto-fit, minmax(200px, 1fr)); gap: 15px; margin-bottom: 20px; }\n\
         .stat-card h3 { font-size: 32px; color: #667eea; }\n\
         .job-header { display: flex; justify-content: space-between; align-items: start; margin-bottom: 15px; }\n\
         .job-title { font-size: 20px; font-weight: 600; }\n\
         .job-company { color: #667eea; }\n\
         .job-location { color: #718096; font-size: 14px; }\n\
         .score-badge { color: white; padding: 8px 16px; border-radius: 20px; font-weight: bold; }\n\
         .score-badge.high { background: #38a169; }\n\
         .score-badge.medium { background: #dd6b20; }\n\
         .score-badge.low { background: #e53e3e; }\n\
         .verdict { font-weight: 500; margin-bottom: 15px; }\n\
         .points { display: grid; grid-template-columns: 1fr 1fr; gap: 15px; margin-bottom: 15px; }\n\
         .points-section { background: #f7fafc; padding: 15px; border-radius: 8px; }\n\
         .points-section h4 { font-size: 14px; text-transform: uppercase; margin-bottom: 10px; }\n\
         .points-section ul { list-style: none; }\n\
         .points-section li { padding: 4px 0; color: #4a5568; font-size: 14px; }\n\
         .recommendation { background: #edf2f7; padding: 12px 16px; border-radius: 8px; margin-bottom: 15px; }\n\
         .job-link { display: inline-block; background: #667eea; color: white; padding: 10px 20px; border-radius: 6px; text-decoration: none; }\n\
         h2 { color: white; margin: 20px 0; }\n\
         .empty { color: white; text-align: center; font-size: 18px; }\n\
         </style>\n</head>\n<body>\n<div class=\"container\">\n",
    );

    html.push_str(&format!(
        "<div class=\"header\"><h1>Veille Alternance</h1>\
         <p>Dernière mise à jour : {}</p></div>\n",
        generated_at.format("%d/%m/%Y à %H:%M")
    ));
    html.push_str(&format!(
        "<div class=\"stats\">\
         <div class=\"stat-card\"><h3>{total}</h3><p>Offres totales</p></div>\
         <div class=\"stat-card\"><h3>{relevant}</h3><p>Offres pertinentes (&ge;7/10)</p></div>\
         <div class=\"stat-card\"><h3>{excellent}</h3><p>Excellentes offres (&ge;8/10)</p></div>\
         </div>\n",
        total = ranked.len(),
    ));

    let top: Vec<_> = ranked
        .iter()
        .filter(|r| r.score() >= RELEVANT_SCORE)
        .take(MAX_REPORT_CARDS)
        .collect();
    if top.is_empty() {
        html.push_str("<p class=\"empty\">Aucune offre pertinente pour le moment.</p>\n");
    } else {
        html.push_str("<h2>Top opportunités</h2>\n");
        for record in top {
            push_job_card(&mut html, record);
        }
    }

    html.push_str("</div>\n</body>\n</html>\n");
    html
}

pub async fn render_to_file(
    path: impl AsRef<Path>,
    records: &JobMap,
    generated_at: DateTime<Utc>,
) -> Result<()> {
    let path = path.as_ref();
    let html = render_html(records, generated_at);
    tokio::fs::write(path, html)
        .await
        .with_context(|| format!("writing report {}", path.display()))
}
