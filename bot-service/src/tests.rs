#[cfg(test)]
mod tests {
    use crate::{
        already_replied, AuditLog, ItemOutcome, ReplyComposer, Responder, RetryPolicy,
        StreamPoller,
    };
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use salesbot_core::{
        BotSettings, Comment, ContentItem, ContentStream, CoreError, ErrorCategory, ErrorExt,
        ForumApi, PostedReply, RedditApiError, SaleListing, SearchRequest, Submission,
        ThreadNode, ThreadRef, VendorRecord, VendorRegistry,
    };
    use std::collections::{HashMap, VecDeque};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const BOT: &str = "TeaSalesBot";

    const VENDORS: &str = r#"[
        {"name": "What-Cha", "reddit_username": "What-Cha", "store_url": "what-cha.com"},
        {"name": "Yunomi", "store_url": "yunomi.life"},
        {"name": "Mei Leaf", "nicknames": ["MeiLeaf"]}
    ]"#;

    /// In-memory forum. Search results are keyed by a fragment of the query.
    #[derive(Default)]
    struct MockForum {
        submissions: HashMap<String, Submission>,
        top_level_authors: HashMap<String, Vec<Option<String>>>,
        nodes: HashMap<String, ThreadNode>,
        sales: Vec<(String, SaleListing)>,
        search_failures: Vec<String>,
        scripted_replies: Mutex<VecDeque<Result<PostedReply, CoreError>>>,
        reply_calls: AtomicUsize,
        node_reads: AtomicUsize,
        posted: Mutex<Vec<(ThreadRef, String)>>,
    }

    impl MockForum {
        fn with_submission(mut self, submission: Submission) -> Self {
            self.submissions.insert(submission.id.clone(), submission);
            self
        }

        fn with_node(mut self, id: &str, parent: ThreadRef, reply_authors: &[&str]) -> Self {
            self.nodes.insert(
                id.to_string(),
                ThreadNode {
                    id: id.to_string(),
                    parent_ref: parent,
                    reply_authors: reply_authors.iter().map(|a| Some(a.to_string())).collect(),
                },
            );
            self
        }

        fn with_sale(mut self, key: &str, title: &str, age_days: i64) -> Self {
            let n = self.sales.len();
            self.sales.push((
                key.to_string(),
                SaleListing {
                    title: title.to_string(),
                    url: format!("https://www.reddit.com/r/teasales/comments/{n}/"),
                    posted_at: Utc::now() - ChronoDuration::days(age_days),
                },
            ));
            self
        }

        fn script_replies(self, results: Vec<Result<PostedReply, CoreError>>) -> Self {
            *self.scripted_replies.lock().unwrap() = results.into();
            self
        }

        fn reply_calls(&self) -> usize {
            self.reply_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ForumApi for MockForum {
        async fn submission(&self, id: &str) -> Result<Submission, CoreError> {
            self.submissions.get(id).cloned().ok_or_else(|| {
                CoreError::RedditApi(RedditApiError::ThingNotFound {
                    fullname: format!("t3_{id}"),
                })
            })
        }

        async fn submission_reply_authors(
            &self,
            id: &str,
        ) -> Result<Vec<Option<String>>, CoreError> {
            Ok(self.top_level_authors.get(id).cloned().unwrap_or_default())
        }

        async fn comment_node(
            &self,
            _submission_id: &str,
            comment_id: &str,
        ) -> Result<ThreadNode, CoreError> {
            self.node_reads.fetch_add(1, Ordering::SeqCst);
            self.nodes.get(comment_id).cloned().ok_or_else(|| {
                CoreError::RedditApi(RedditApiError::ThingNotFound {
                    fullname: format!("t1_{comment_id}"),
                })
            })
        }

        async fn search(&self, request: &SearchRequest) -> Result<Vec<SaleListing>, CoreError> {
            if self.search_failures.iter().any(|key| request.query.contains(key)) {
                return Err(CoreError::RedditApi(RedditApiError::ServerError {
                    status_code: 503,
                }));
            }
            Ok(self
                .sales
                .iter()
                .filter(|(key, _)| request.query.contains(key.as_str()))
                .map(|(_, sale)| sale.clone())
                .collect())
        }

        async fn reply(&self, parent: &ThreadRef, body: &str) -> Result<PostedReply, CoreError> {
            let call = self.reply_calls.fetch_add(1, Ordering::SeqCst) + 1;
            let scripted = self.scripted_replies.lock().unwrap().pop_front();
            let result = scripted.unwrap_or_else(|| {
                Ok(PostedReply {
                    id: format!("reply{call}"),
                })
            });
            if result.is_ok() {
                self.posted
                    .lock()
                    .unwrap()
                    .push((parent.clone(), body.to_string()));
            }
            result
        }
    }

    enum Scripted {
        Item(ContentItem),
        Fail(CoreError),
    }

    struct VecStream {
        name: String,
        items: VecDeque<Scripted>,
    }

    impl VecStream {
        fn boxed(name: &str, items: Vec<Scripted>) -> Box<dyn ContentStream> {
            Box::new(Self {
                name: name.to_string(),
                items: items.into(),
            })
        }
    }

    #[async_trait]
    impl ContentStream for VecStream {
        async fn poll_next(&mut self) -> Result<Option<ContentItem>, CoreError> {
            match self.items.pop_front() {
                Some(Scripted::Item(item)) => Ok(Some(item)),
                Some(Scripted::Fail(e)) => Err(e),
                None => Ok(None),
            }
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn registry() -> Arc<VendorRegistry> {
        Arc::new(VendorRegistry::from_json_str(VENDORS).unwrap())
    }

    fn submission(id: &str, author: Option<&str>, title: &str, flair: Option<&str>) -> Submission {
        Submission {
            id: id.to_string(),
            author: author.map(str::to_string),
            title: title.to_string(),
            body: String::new(),
            category_label: flair.map(str::to_string),
            permalink: format!("https://www.reddit.com/r/tea/comments/{id}/post/"),
        }
    }

    fn comment(
        id: &str,
        submission_id: &str,
        parent: ThreadRef,
        author: &str,
        body: &str,
    ) -> ContentItem {
        ContentItem::Comment(Comment {
            id: id.to_string(),
            author: Some(author.to_string()),
            body: body.to_string(),
            parent_ref: parent,
            submission_ref: submission_id.to_string(),
            submission_permalink: format!(
                "https://www.reddit.com/r/tea/comments/{submission_id}/post/"
            ),
        })
    }

    fn rate_limited() -> CoreError {
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 120 })
    }

    fn posted(id: &str) -> Result<PostedReply, CoreError> {
        Ok(PostedReply { id: id.to_string() })
    }

    fn settings(audit_dir: &Path) -> BotSettings {
        BotSettings {
            audit_dir: audit_dir.to_path_buf(),
            rate_limit_cooldown_secs: 0,
            max_reply_attempts: 3,
            ..Default::default()
        }
    }

    fn audit_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    fn responder(dir: &Path, max_attempts: u32) -> Responder {
        Responder::new(
            RetryPolicy {
                max_attempts,
                cooldown: Duration::from_millis(1),
            },
            AuditLog::new(dir),
        )
    }

    // Already-replied guard

    #[tokio::test]
    async fn test_direct_reply_by_bot_is_detected() {
        let forum = MockForum::default().with_node(
            "c1",
            ThreadRef::Submission("s1".into()),
            &["someone", "teasalesbot"],
        );
        let item = comment("c1", "s1", ThreadRef::Submission("s1".into()), "leafy", "what-cha");

        assert!(assert_ok!(already_replied(&forum, &item, BOT).await));
    }

    #[tokio::test]
    async fn test_removed_bot_reply_is_not_detected() {
        let forum = MockForum::default().with_node(
            "c1",
            ThreadRef::Submission("s1".into()),
            &["someone"],
        );
        let item = comment("c1", "s1", ThreadRef::Submission("s1".into()), "leafy", "what-cha");

        assert!(!assert_ok!(already_replied(&forum, &item, BOT).await));
    }

    #[tokio::test]
    async fn test_reply_under_immediate_parent_is_detected() {
        let forum = MockForum::default()
            .with_node("root", ThreadRef::Submission("s1".into()), &["parent_author"])
            .with_node("parent", ThreadRef::Comment("root".into()), &[BOT, "child_author"])
            .with_node("child", ThreadRef::Comment("parent".into()), &[]);
        let item = comment("child", "s1", ThreadRef::Comment("parent".into()), "leafy", "yunomi");

        assert!(assert_ok!(already_replied(&forum, &item, BOT).await));
        assert_eq!(forum.node_reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_walk_stops_at_thread_root() {
        let forum = MockForum::default()
            .with_node("root", ThreadRef::Submission("s1".into()), &["a"])
            .with_node("child", ThreadRef::Comment("root".into()), &[]);
        let item = comment("child", "s1", ThreadRef::Comment("root".into()), "a", "yunomi");

        assert!(!assert_ok!(already_replied(&forum, &item, BOT).await));
        assert_eq!(forum.node_reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_submission_checks_top_level_comments() {
        let mut forum = MockForum::default();
        forum
            .top_level_authors
            .insert("s1".into(), vec![None, Some(BOT.to_string())]);
        forum.top_level_authors.insert("s2".into(), vec![None]);

        let replied = ContentItem::Submission(submission("s1", Some("a"), "yunomi", None));
        let fresh = ContentItem::Submission(submission("s2", Some("a"), "yunomi", None));

        assert!(assert_ok!(already_replied(&forum, &replied, BOT).await));
        assert!(!assert_ok!(already_replied(&forum, &fresh, BOT).await));
    }

    #[tokio::test]
    async fn test_cyclic_ancestry_is_an_error() {
        let forum = MockForum::default()
            .with_node("a", ThreadRef::Comment("b".into()), &[])
            .with_node("b", ThreadRef::Comment("a".into()), &[]);
        let item = comment("a", "s1", ThreadRef::Comment("b".into()), "x", "yunomi");

        let e = assert_err!(already_replied(&forum, &item, BOT).await);
        assert_eq!(e.error_code(), "REDDIT_INVALID_RESPONSE");
    }

    // Reply composer

    #[tokio::test]
    async fn test_compose_reply_none_without_sales() {
        let registry = registry();
        let mentions: Vec<&VendorRecord> = registry.iter().collect();
        let forum = MockForum::default().with_sale(r#"title:"yunomi""#, "Old Yunomi sale", 45);
        let composer = ReplyComposer::new("teasales", "footer");

        assert_eq!(assert_ok!(composer.compose_reply(&forum, &mentions).await), None);
    }

    #[tokio::test]
    async fn test_compose_reply_groups_in_mention_order() {
        let registry = registry();
        let mentions: Vec<&VendorRecord> = registry.iter().collect();
        let forum = MockForum::default()
            .with_sale(r#"title:"meileaf""#, "Mei Leaf | spring sale", 2)
            .with_sale(r#"title:"what-cha""#, "What-Cha 10% off", 5)
            .with_sale(r#"title:"what-cha""#, "What-Cha clearance", 1);
        let composer = ReplyComposer::new("teasales", "footer");

        let body = assert_ok!(composer.compose_reply(&forum, &mentions).await).unwrap();
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines[0], "| vendor | sales in /r/teasales |");
        assert!(lines[2].starts_with("| What-Cha | [What-Cha clearance]"));
        assert!(lines[3].starts_with("|  | [What-Cha 10% off]"));
        assert!(lines[4].starts_with("| Mei Leaf | [Mei Leaf - spring sale]"));
        assert_eq!(lines.last(), Some(&"footer"));
        assert!(!body.contains("Yunomi"));
    }

    // Responder

    #[tokio::test]
    async fn test_reply_succeeds_within_rate_limit_bound() {
        let dir = tempfile::tempdir().unwrap();
        let forum = MockForum::default().script_replies(vec![
            Err(rate_limited()),
            Err(rate_limited()),
            posted("abc123"),
        ]);
        let item = ContentItem::Submission(submission("s1", Some("a"), "what-cha", None));

        let record = assert_ok!(responder(dir.path(), 3).post_reply(&forum, &item, "table").await);
        assert_eq!(forum.reply_calls(), 3);
        assert_eq!(record.reply_id, "abc123");
        assert_eq!(record.parent_url, "https://www.reddit.com/r/tea/comments/s1/post/");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("abc123.log")).unwrap(),
            "table"
        );
    }

    #[tokio::test]
    async fn test_audit_keeps_the_body_as_sent() {
        let dir = tempfile::tempdir().unwrap();
        let forum = MockForum::default().script_replies(vec![posted("amp1")]);
        let item = ContentItem::Submission(submission("s1", Some("a"), "what-cha", None));
        let body = "| vendor | sales |\n|:--|:--:|\n| Tea & Co | [Tea > Coffee](u) |";

        let record = assert_ok!(responder(dir.path(), 1).post_reply(&forum, &item, body).await);
        assert_eq!(record.body, body);
        assert_eq!(std::fs::read_to_string(dir.path().join("amp1.log")).unwrap(), body);
        assert_eq!(forum.posted.lock().unwrap()[0].1, body);
    }

    #[tokio::test]
    async fn test_reply_gives_up_after_bound_without_audit() {
        let dir = tempfile::tempdir().unwrap();
        let forum = MockForum::default().script_replies(vec![
            Err(rate_limited()),
            Err(rate_limited()),
            Err(rate_limited()),
            posted("too_late"),
        ]);
        let item = ContentItem::Submission(submission("s1", Some("a"), "what-cha", None));

        let e = assert_err!(responder(dir.path(), 3).post_reply(&forum, &item, "table").await);
        assert_eq!(e.category(), ErrorCategory::RateLimit);
        assert_eq!(forum.reply_calls(), 3);
        assert_eq!(audit_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_other_reply_errors_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let forum = MockForum::default().script_replies(vec![Err(CoreError::RedditApi(
            RedditApiError::Rejected {
                error_type: "THREAD_LOCKED".to_string(),
                message: "that thread is locked".to_string(),
            },
        ))]);
        let item = ContentItem::Submission(submission("s1", Some("a"), "what-cha", None));

        let e = assert_err!(responder(dir.path(), 20).post_reply(&forum, &item, "table").await);
        assert_eq!(e.error_code(), "REDDIT_THREAD_LOCKED");
        assert_eq!(forum.reply_calls(), 1);
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_reply() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "").unwrap();

        let forum = MockForum::default();
        let item = comment("c9", "s1", ThreadRef::Submission("s1".into()), "a", "what-cha");

        let record = assert_ok!(responder(&blocker, 1).post_reply(&forum, &item, "table").await);
        assert_eq!(record.parent_url, "https://www.reddit.com/r/tea/comments/s1/post/c9");
        assert_eq!(forum.posted.lock().unwrap()[0].0, ThreadRef::Comment("c9".into()));
    }

    // Stream poller

    fn poller(
        forum: Arc<MockForum>,
        streams: Vec<Box<dyn ContentStream>>,
        audit_dir: &Path,
    ) -> StreamPoller<MockForum> {
        StreamPoller::new(streams, forum, registry(), BOT, &settings(audit_dir))
    }

    #[tokio::test]
    async fn test_poller_skips_self_deleted_and_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let forum = Arc::new(
            MockForum::default()
                .with_submission(submission("meta", Some("mod"), "rules", Some("Meta")))
                .with_sale(r#"title:"what-cha""#, "What-Cha sale", 1),
        );
        let p = poller(forum.clone(), Vec::new(), dir.path());

        let own =
            ContentItem::Submission(submission("s1", Some("teasalesbot"), "what-cha", None));
        let deleted = ContentItem::Submission(submission("s2", None, "what-cha", None));
        let discussion =
            ContentItem::Submission(submission("s3", Some("a"), "what-cha", Some("Discussion")));
        let under_meta =
            comment("c1", "meta", ThreadRef::Submission("meta".into()), "a", "what-cha");

        assert_eq!(assert_ok!(p.process_item(&own).await), ItemOutcome::SkippedSelf);
        assert_eq!(
            assert_ok!(p.process_item(&deleted).await),
            ItemOutcome::SkippedDeletedAuthor
        );
        assert_eq!(
            assert_ok!(p.process_item(&discussion).await),
            ItemOutcome::SkippedCategory("Discussion".to_string())
        );
        assert_eq!(
            assert_ok!(p.process_item(&under_meta).await),
            ItemOutcome::SkippedCategory("Meta".to_string())
        );
        assert_eq!(forum.reply_calls(), 0);
    }

    #[tokio::test]
    async fn test_poller_matches_title_only_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let forum = Arc::new(MockForum::default().with_sale(r#"title:"yunomi""#, "Yunomi sale", 1));
        let p = poller(forum.clone(), Vec::new(), dir.path());

        let mut item = submission("s1", Some("a"), "Looking for matcha", None);
        item.body = "I usually buy from yunomi".to_string();

        assert_eq!(
            assert_ok!(p.process_item(&ContentItem::Submission(item)).await),
            ItemOutcome::NoMentions
        );
    }

    #[tokio::test]
    async fn test_poller_scans_submission_body_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let forum =
            Arc::new(MockForum::default().with_sale(r#"title:"yunomi""#, "Yunomi sale", 1));
        let settings = BotSettings {
            scan_submission_body: true,
            ..settings(dir.path())
        };
        let p = StreamPoller::new(Vec::new(), forum.clone(), registry(), BOT, &settings);

        let mut item = submission("s1", Some("a"), "Looking for matcha", None);
        item.body = "I usually buy from yunomi".to_string();

        match assert_ok!(p.process_item(&ContentItem::Submission(item)).await) {
            ItemOutcome::Replied(record) => assert!(record.body.contains("Yunomi sale")),
            other => panic!("expected a reply, got {other:?}"),
        }
        assert_eq!(forum.reply_calls(), 1);
    }

    #[tokio::test]
    async fn test_poller_replies_then_guards() {
        let dir = tempfile::tempdir().unwrap();
        let forum = Arc::new(
            MockForum::default()
                .with_submission(submission("s1", Some("op"), "Matcha?", None))
                .with_node("c1", ThreadRef::Submission("s1".into()), &[])
                .with_node("c2", ThreadRef::Submission("s1".into()), &[BOT])
                .with_sale(r#"title:"yunomi""#, "Yunomi sale", 1),
        );
        let p = poller(forum.clone(), Vec::new(), dir.path());

        let fresh = comment("c1", "s1", ThreadRef::Submission("s1".into()), "a", "Try Yunomi!");
        let answered = comment("c2", "s1", ThreadRef::Submission("s1".into()), "b", "yunomi.life");
        let nothing = comment("c3", "s1", ThreadRef::Submission("s1".into()), "b", "What-Cha");

        match assert_ok!(p.process_item(&fresh).await) {
            ItemOutcome::Replied(record) => {
                assert!(record.body.contains("Yunomi sale"));
                assert!(dir.path().join(format!("{}.log", record.reply_id)).exists());
            }
            other => panic!("expected a reply, got {other:?}"),
        }
        assert_eq!(
            assert_ok!(p.process_item(&answered).await),
            ItemOutcome::AlreadyReplied
        );

        let unsold = MockForum::default()
            .with_submission(submission("s1", Some("op"), "Matcha?", None))
            .with_node("c3", ThreadRef::Submission("s1".into()), &[]);
        let p = poller(Arc::new(unsold), Vec::new(), dir.path());
        assert_eq!(assert_ok!(p.process_item(&nothing).await), ItemOutcome::NoSales);
        assert_eq!(forum.reply_calls(), 1);
    }

    #[tokio::test]
    async fn test_pass_continues_after_item_error_and_alternates() {
        let dir = tempfile::tempdir().unwrap();
        let mut forum = MockForum::default()
            .with_sale(r#"title:"yunomi""#, "Yunomi sale", 1);
        forum.search_failures.push(r#"title:"what-cha""#.to_string());
        let forum = Arc::new(forum);

        let haul = |id: &str, title: &str| {
            Scripted::Item(ContentItem::Submission(submission(id, Some("a"), title, None)))
        };
        let submissions = VecStream::boxed(
            "submissions",
            vec![haul("s1", "what-cha haul"), haul("s2", "yunomi haul")],
        );
        let comments = VecStream::boxed("comments", Vec::new());
        let mut p = poller(forum.clone(), vec![submissions, comments], dir.path());

        let summary = assert_ok!(p.run_pass().await);
        assert_eq!(summary.stream, "submissions");
        assert_eq!(summary.items, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.replied, 1);
        assert_eq!(p.stream_index(), 1);

        let summary = assert_ok!(p.run_pass().await);
        assert_eq!(summary.stream, "comments");
        assert_eq!(summary.items, 0);
        assert_eq!(p.stream_index(), 0);
        assert_eq!(forum.reply_calls(), 1);
    }

    #[tokio::test]
    async fn test_stream_errors_end_pass_or_stop_poller() {
        let dir = tempfile::tempdir().unwrap();
        let forum = Arc::new(MockForum::default());

        let flaky = VecStream::boxed(
            "flaky",
            vec![
                Scripted::Fail(CoreError::RedditApi(RedditApiError::RequestTimeout)),
                Scripted::Item(ContentItem::Submission(submission("s1", Some("a"), "tea", None))),
            ],
        );
        let broken = VecStream::boxed(
            "broken",
            vec![Scripted::Fail(CoreError::RedditApi(RedditApiError::Forbidden {
                resource: "/r/tea/comments".to_string(),
            }))],
        );
        let mut p = poller(forum, vec![flaky, broken], dir.path());

        let summary = assert_ok!(p.run_pass().await);
        assert!(summary.interrupted);
        assert_eq!(summary.items, 0);

        let e = assert_err!(p.run_pass().await);
        assert_eq!(e.category(), ErrorCategory::Platform);
    }
}
