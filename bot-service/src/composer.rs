use chrono::{Duration, Utc};
use salesbot_core::{
    BotSettings, CoreError, ForumApi, SaleListing, SearchRequest, SearchSort, TimeFilter,
    VendorRecord,
};
use tracing::debug;

/// Sale posts carrying one of these flairs are no longer of interest.
const EXCLUDED_SALE_FLAIRS: [&str; 2] = ["expired", "meta"];
const SEARCH_LIMIT: u32 = 100;
const SALE_WINDOW_DAYS: i64 = 30;
const TABLE_DELIMITER: char = '|';

fn keyword(raw: &str) -> String {
    raw.replace('"', "")
}

fn phrase_clause(raw: &str) -> String {
    let k = keyword(raw);
    format!(r#"selftext:"{k}" OR title:"{k}""#)
}

/// Search query matching any of the vendor's identifying strings, minus stale posts.
pub fn build_search_query(vendor: &VendorRecord) -> String {
    let mut clauses = vec![phrase_clause(&vendor.match_name)];

    if let Some(handle) = &vendor.account_handle {
        clauses.push(format!(r#"author:"{}" OR {}"#, keyword(handle), phrase_clause(handle)));
    }
    for nickname in &vendor.nicknames {
        clauses.push(phrase_clause(nickname));
    }
    if let Some(domain) = &vendor.store_domain {
        clauses.push(format!(r#"site:"{}" OR {}"#, keyword(domain), phrase_clause(domain)));
    }

    let exclusions = EXCLUDED_SALE_FLAIRS
        .iter()
        .map(|flair| format!("flair:{flair}"))
        .collect::<Vec<_>>()
        .join(" OR ");

    format!("({}) NOT ({})", clauses.join(" OR "), exclusions)
}

/// Replaces the table delimiter so a title cannot add or split cells.
pub fn table_safe(text: &str) -> String {
    text.replace(TABLE_DELIMITER, "-")
}

/// Renders one table row group per vendor that has listings, followed by the footer.
///
/// Returns `None` when no vendor has any listing.
pub fn render_reply(
    sales_subreddit: &str,
    footer: &str,
    groups: &[(&VendorRecord, Vec<SaleListing>)],
) -> Option<String> {
    let mut rows = vec![
        format!("| vendor | sales in /r/{} |", sales_subreddit),
        "|:--|:--:|".to_string(),
    ];
    let header_rows = rows.len();

    for (vendor, listings) in groups {
        for (i, sale) in listings.iter().enumerate() {
            let name = if i == 0 {
                table_safe(&vendor.display_name)
            } else {
                String::new()
            };
            rows.push(format!(
                "| {} | [{}]({}) |",
                name,
                table_safe(&sale.title),
                sale.url.replace(TABLE_DELIMITER, "%7C")
            ));
        }
    }

    if rows.len() == header_rows {
        return None;
    }

    rows.push(String::new());
    rows.push(footer.to_string());
    Some(rows.join("\n"))
}

/// Looks up each mentioned vendor's recent sales and renders the reply body.
#[derive(Debug, Clone)]
pub struct ReplyComposer {
    sales_subreddit: String,
    footer: String,
    window: Duration,
}

impl ReplyComposer {
    pub fn new(sales_subreddit: impl Into<String>, footer: impl Into<String>) -> Self {
        Self {
            sales_subreddit: sales_subreddit.into(),
            footer: footer.into(),
            window: Duration::days(SALE_WINDOW_DAYS),
        }
    }

    pub fn from_settings(settings: &BotSettings) -> Self {
        Self::new(settings.sales_subreddit.clone(), settings.footer.clone())
    }

    /// The vendor's sales from the last 30 days, newest first.
    pub async fn recent_sales<F>(
        &self,
        forum: &F,
        vendor: &VendorRecord,
    ) -> Result<Vec<SaleListing>, CoreError>
    where
        F: ForumApi + ?Sized,
    {
        let request = SearchRequest {
            subreddit: self.sales_subreddit.clone(),
            query: build_search_query(vendor),
            sort: SearchSort::New,
            time_filter: TimeFilter::Month,
            limit: SEARCH_LIMIT,
        };
        debug!("Searching r/{} with: {}", request.subreddit, request.query);

        let cutoff = Utc::now() - self.window;
        let mut sales: Vec<SaleListing> = forum
            .search(&request)
            .await?
            .into_iter()
            .filter(|sale| sale.posted_at >= cutoff)
            .collect();
        sales.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
        Ok(sales)
    }

    pub async fn compose_reply<F>(
        &self,
        forum: &F,
        mentions: &[&VendorRecord],
    ) -> Result<Option<String>, CoreError>
    where
        F: ForumApi + ?Sized,
    {
        let mut groups = Vec::with_capacity(mentions.len());
        for vendor in mentions {
            let sales = self.recent_sales(forum, vendor).await?;
            debug!("{}: {} recent sales", vendor.display_name, sales.len());
            groups.push((*vendor, sales));
        }

        let reply = render_reply(&self.sales_subreddit, &self.footer, &groups);
        if let Some(body) = &reply {
            debug!("Created reply table:\n{}", body);
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vendor(name: &str) -> VendorRecord {
        VendorRecord {
            display_name: name.to_string(),
            match_name: name.to_lowercase(),
            account_handle: None,
            store_domain: None,
            nicknames: Vec::new(),
        }
    }

    fn sale(title: &str) -> SaleListing {
        SaleListing {
            title: title.to_string(),
            url: format!("https://www.reddit.com/r/teasales/comments/{}/", title.len()),
            posted_at: Utc::now(),
        }
    }

    fn cells(row: &str) -> Vec<String> {
        let inner = row.trim().trim_start_matches('|').trim_end_matches('|');
        inner.split('|').map(|cell| cell.trim().to_string()).collect()
    }

    #[test]
    fn test_query_with_name_only() {
        assert_eq!(
            build_search_query(&vendor("Yunomi")),
            r#"(selftext:"yunomi" OR title:"yunomi") NOT (flair:expired OR flair:meta)"#
        );
    }

    #[test]
    fn test_query_with_every_criterion() {
        let record = VendorRecord {
            display_name: "What-Cha".to_string(),
            match_name: "what-cha".to_string(),
            account_handle: Some("what-cha".to_string()),
            store_domain: Some("what-cha.com".to_string()),
            nicknames: vec!["whatcha".to_string(), "w\"c".to_string()],
        };
        let query = build_search_query(&record);

        assert!(query
            .starts_with(r#"(selftext:"what-cha" OR title:"what-cha" OR author:"what-cha""#));
        assert!(query.contains(r#"selftext:"whatcha" OR title:"whatcha""#));
        assert!(query.contains(r#"title:"wc""#));
        assert!(query.contains(r#"site:"what-cha.com" OR selftext:"what-cha.com""#));
        assert!(query.ends_with(") NOT (flair:expired OR flair:meta)"));
    }

    #[test]
    fn test_table_safe() {
        assert_eq!(table_safe("20% off | oolongs | today"), "20% off - oolongs - today");
        assert_eq!(table_safe("plain"), "plain");
    }

    #[test]
    fn test_render_nothing_when_no_sales() {
        let a = vendor("Yunomi");
        let b = vendor("What-Cha");
        let groups = vec![(&a, Vec::new()), (&b, Vec::new())];
        assert_eq!(render_reply("teasales", "footer", &groups), None);
        assert_eq!(render_reply("teasales", "footer", &[]), None);
    }

    #[test]
    fn test_render_groups_rows_under_first_cell() {
        let a = vendor("What-Cha");
        let b = vendor("Yunomi");
        let c = vendor("Mei Leaf");
        let groups = vec![
            (&a, vec![sale("Oolong sale"), sale("Black tea sale")]),
            (&b, Vec::new()),
            (&c, vec![sale("Teaware | 10% off")]),
        ];

        let body = render_reply("teasales", "^(made by a bot)", &groups).unwrap();
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines[0], "| vendor | sales in /r/teasales |");
        assert_eq!(lines[1], "|:--|:--:|");
        assert_eq!(cells(lines[2])[0], "What-Cha");
        assert_eq!(cells(lines[3])[0], "");
        assert_eq!(cells(lines[4])[0], "Mei Leaf");
        assert!(lines[4].contains("[Teaware - 10% off]"));
        assert_eq!(lines[5], "");
        assert_eq!(lines[6], "^(made by a bot)");
        assert!(!body.contains("Yunomi"));

        for row in &lines[..5] {
            assert_eq!(cells(row).len(), 2, "row {row:?} should have two cells");
        }
    }
}
