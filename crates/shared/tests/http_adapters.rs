use reqwest::Client;
use serde_json::json;
use shared::sources::{HtmlSource, RssSource};
use shared::{
    ContentSource, GroqClient, LanguageModel, NewsletterError, PreferenceStore, SignalSource,
    StyleStore, SupabaseStore, XRecentSearch,
};
use std::collections::BTreeSet;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn groq_returns_first_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "openai/gpt-oss-20b",
            "messages": [{ "role": "user", "content": "hello" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "SUMMARY: hi" } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let groq = GroqClient::new("test-key".to_string())
        .unwrap()
        .with_base_url(server.uri());
    let text = groq.complete("openai/gpt-oss-20b", "hello").await.unwrap();
    assert_eq!(text, "SUMMARY: hi");
}

#[tokio::test]
async fn groq_errors_are_model_invocation_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let groq = GroqClient::new("k".to_string())
        .unwrap()
        .with_base_url(server.uri());
    let err = groq.complete("m", "p").await.unwrap_err();
    assert!(matches!(err, NewsletterError::ModelInvocation(msg) if msg.contains("rate limited")));
}

#[tokio::test]
async fn groq_empty_completion_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "   " } }]
        })))
        .mount(&server)
        .await;

    let groq = GroqClient::new("k".to_string())
        .unwrap()
        .with_base_url(server.uri());
    assert!(matches!(
        groq.complete("m", "p").await,
        Err(NewsletterError::ModelInvocation(_))
    ));
}

#[tokio::test]
async fn supabase_updates_existing_topics_row() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/user_preference"))
        .and(query_param("select", "email"))
        .and(query_param("email", "eq.a@b.co"))
        .and(header("apikey", "anon"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "email": "a@b.co" }])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/user_preference"))
        .and(query_param("email", "eq.a@b.co"))
        .and(body_partial_json(json!({ "topics": ["AI", "Robotics"] })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let store = SupabaseStore::new(&server.uri(), "anon".to_string()).unwrap();
    store
        .upsert_topics("a@b.co", &["AI".to_string(), "Robotics".to_string()])
        .await
        .unwrap();
}

#[tokio::test]
async fn supabase_twitter_insert_starts_with_empty_topics() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/user_preference"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/user_preference"))
        .and(header("prefer", "return=minimal"))
        .and(body_partial_json(json!({
            "email": "new@b.co",
            "topics": [],
            "twitter_handles": ["karpathy"],
            "twitter_hashtags": ["rustlang"]
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let store = SupabaseStore::new(&server.uri(), "anon".to_string()).unwrap();
    store
        .upsert_twitter("new@b.co", &set(&["karpathy"]), &set(&["rustlang"]))
        .await
        .unwrap();
}

#[tokio::test]
async fn supabase_list_skips_rows_without_email() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/user_preference"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "email": "a@b.co", "topics": ["AI"], "twitter_handles": null },
            { "email": null, "topics": ["Robotics"] },
            { "email": "c@d.co", "topics": null }
        ])))
        .mount(&server)
        .await;

    let store = SupabaseStore::new(&server.uri(), "anon".to_string()).unwrap();
    let users = store.list().await.unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].primary_topic(), Some("AI"));
    assert!(users[1].topics.is_empty());
}

#[tokio::test]
async fn supabase_missing_style_row_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/user_style_samples"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = SupabaseStore::new(&server.uri(), "anon".to_string()).unwrap();
    assert!(store.get_samples("a@b.co").await.unwrap().is_empty());
}

#[tokio::test]
async fn supabase_http_failure_is_a_store_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let store = SupabaseStore::new(&server.uri(), "anon".to_string()).unwrap();
    assert!(matches!(store.list().await, Err(NewsletterError::Store(_))));
}

#[tokio::test]
async fn x_search_keeps_working_terms() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tweets/search/recent"))
        .and(query_param("query", "from:karpathy"))
        .and(header("authorization", "Bearer x-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "id": "1", "text": "New agents\npaper", "author_id": "42" },
                { "id": "2", "text": "Second post" }
            ],
            "includes": { "users": [{ "id": "42", "username": "karpathy" }] }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tweets/search/recent"))
        .and(query_param("query", "#rustlang"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let x = XRecentSearch::new("x-token".to_string(), Client::new()).with_base_url(server.uri());
    let posts = x
        .recent_posts(&set(&["@karpathy"]), &set(&["rustlang"]))
        .await
        .unwrap();

    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].term, "@karpathy");
    assert_eq!(posts[0].author.as_deref(), Some("karpathy"));
    assert_eq!(posts[0].link.as_str(), "https://x.com/karpathy/status/1");
    assert_eq!(posts[1].link.as_str(), "https://x.com/i/web/status/2");
}

#[tokio::test]
async fn rss_source_fills_topic_into_url() {
    let server = MockServer::start().await;
    let feed = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Wire</title>
  <item>
    <title>Agents ship to production</title>
    <link>https://wire.example/agents</link>
    <description>&lt;p&gt;Teams deploy &lt;b&gt;agents&lt;/b&gt; widely.&lt;/p&gt;</description>
    <pubDate>Mon, 19 Oct 2026 08:00:00 GMT</pubDate>
  </item>
</channel></rss>"#;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .and(query_param("q", "AI agents"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed))
        .expect(1)
        .mount(&server)
        .await;

    let source = RssSource::new("Wire", format!("{}/rss?q={{topic}}", server.uri()), Client::new());
    let articles = source.fetch("AI agents").await.unwrap();

    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].source, "Wire");
    assert_eq!(articles[0].title.as_deref(), Some("Agents ship to production"));
    assert_eq!(
        articles[0].link.as_ref().map(|l| l.as_str()),
        Some("https://wire.example/agents")
    );
    assert!(articles[0].content.starts_with("Agents ship to production\n"));
    assert!(articles[0].content.contains("Teams deploy"));
    assert!(articles[0].published.is_some());
}

#[tokio::test]
async fn rss_source_reports_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let source = RssSource::new("Wire", format!("{}/rss", server.uri()), Client::new());
    assert!(matches!(
        source.fetch("AI").await,
        Err(NewsletterError::SourceUnavailable { .. })
    ));
}

#[tokio::test]
async fn html_source_follows_the_first_links() {
    let server = MockServer::start().await;
    let listing = r#"<html><body>
        <a class="story" href="/one">Agents ship</a>
        <a class="story" href="/two">Robots dance</a>
        <a class="other" href="/ad">Buy now</a>
    </body></html>"#;
    let article = format!(
        "<html><body><p>{}</p></body></html>",
        "Long form reporting about agents shipping to production. ".repeat(5)
    );
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/one"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/two"))
        .respond_with(ResponseTemplate::new(200).set_body_string("unused"))
        .expect(0)
        .mount(&server)
        .await;

    let source = HtmlSource::new(
        "Board",
        format!("{}/list", server.uri()),
        "a.story",
        1,
        Client::new(),
    )
    .unwrap();
    let articles = source.fetch("anything").await.unwrap();

    assert_eq!(articles.len(), 2);
    assert!(articles[0].content.starts_with("Agents ship\n"));
    assert!(articles[0].content.contains("Long form reporting"));
    assert_eq!(articles[1].content, "Robots dance");
    assert_eq!(
        articles[1].link.as_ref().map(|l| l.path()),
        Some("/two")
    );
}
