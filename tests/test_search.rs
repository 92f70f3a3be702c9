mod common;

use std::time::Duration;

use ebook_hub::search::query::{FilterChange, SortOrder};

#[tokio::test(start_paused = true)]
async fn burst_of_terms_dispatches_one_query_with_last_term() {
    let env = common::TestEnv::start();
    env.insert_document("d1", "Toán rời rạc", "Logic và đồ thị", 1);
    env.insert_document("d2", "Vật lý đại cương", "Cơ học chất điểm", 2);
    let search = env.search(10);

    for term in ["v", "vậ", "vật", "vật l", "vật lý"] {
        search.set_term(term);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(env.store.list_calls(), 1);
    let view = search.view();
    assert_eq!(view.term, "vật lý");
    assert_eq!(view.documents.len(), 1);
    assert_eq!(view.documents[0].id, "d2");
}

#[tokio::test]
async fn load_more_without_more_pages_does_nothing() {
    let env = common::TestEnv::start();
    env.insert_documents(3, "Giáo trình", "Tài liệu tham khảo");
    let search = env.search(10);

    search.submit("").await.unwrap();
    let before = search.view();
    assert!(!before.has_more);
    let calls = env.store.list_calls();

    search.load_more().await.unwrap();
    search.load_more().await.unwrap();

    assert_eq!(env.store.list_calls(), calls);
    assert_eq!(search.view().documents, before.documents);
}

#[tokio::test]
async fn short_page_ends_pagination() {
    let env = common::TestEnv::start();
    env.insert_documents(13, "Giáo trình", "Tài liệu tham khảo");
    let search = env.search(10);

    search.submit("").await.unwrap();
    assert_eq!(search.view().documents.len(), 10);
    assert!(search.view().has_more);

    search.load_more().await.unwrap();
    let view = search.view();
    assert_eq!(view.documents.len(), 13);
    assert!(!view.has_more);
    assert_eq!(view.documents.first().unwrap().id, "d12");
    assert_eq!(view.documents.last().unwrap().id, "d00");

    let calls = env.store.list_calls();
    search.load_more().await.unwrap();
    assert_eq!(env.store.list_calls(), calls);
}

#[tokio::test]
async fn term_keeps_matching_subset_in_store_order() {
    let env = common::TestEnv::start();
    env.insert_document("d1", "TOÁN cao cấp", "Giáo trình", 1);
    env.insert_document("d2", "Hóa học", "Phản ứng oxi hóa", 2);
    env.insert_document("d3", "Xác suất", "Bài tập toán ứng dụng", 3);
    env.insert_document("d4", "Sinh học", "Tế bào", 4);
    let search = env.search(10);

    search.submit("Toán").await.unwrap();

    let ids: Vec<String> = search.view().documents.into_iter().map(|d| d.id).collect();
    assert_eq!(ids, vec!["d3", "d1"]);
}

#[tokio::test]
async fn full_page_without_matches_still_reports_more() {
    let env = common::TestEnv::start();
    env.insert_documents(10, "Vật lý", "Cơ học và nhiệt học");
    let search = env.search(10);

    assert!(env.gate.current().is_none());
    search.submit("toán").await.unwrap();

    let view = search.view();
    assert!(view.documents.is_empty());
    assert!(view.has_more);
    assert!(view.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn late_response_to_superseded_search_is_discarded() {
    let env = common::TestEnv::start();
    env.insert_document("d1", "Toán rời rạc", "Logic", 1);
    env.insert_document("d2", "Vật lý", "Cơ học", 2);
    let search = env.search(10);
    env.store.script_list_delays([Duration::from_millis(300), Duration::from_millis(10)]);

    let slow = {
        let search = search.clone();
        tokio::spawn(async move { search.submit("toán").await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    search.submit("vật lý").await.unwrap();
    slow.await.unwrap().unwrap();

    let view = search.view();
    assert_eq!(view.term, "vật lý");
    assert_eq!(view.documents.len(), 1);
    assert_eq!(view.documents[0].id, "d2");
    assert!(!view.loading);
}

#[tokio::test]
async fn filter_change_reruns_active_search() {
    let env = common::TestEnv::start();
    env.insert_documents(3, "Giáo trình", "Tài liệu");
    let search = env.search(10);

    search.submit("giáo").await.unwrap();
    assert_eq!(search.view().documents[0].id, "d02");

    search
        .set_filter(FilterChange::Sort(SortOrder::Oldest))
        .await
        .unwrap();
    assert_eq!(env.store.list_calls(), 2);
    assert_eq!(search.view().documents[0].id, "d00");

    search
        .set_filter(FilterChange::Major(Some("m-other".into())))
        .await
        .unwrap();
    assert!(search.view().documents.is_empty());
    assert!(!search.view().has_more);
}

#[tokio::test]
async fn failed_fetch_keeps_page_and_reports_error() {
    let env = common::TestEnv::start();
    env.insert_documents(12, "Giáo trình", "Tài liệu");
    let search = env.search(10);
    search.submit("").await.unwrap();

    env.store.fail_lists(true);
    assert!(search.load_more().await.is_err());

    let view = search.view();
    assert_eq!(view.documents.len(), 10);
    assert_eq!(view.error.as_deref(), Some("Failed to fetch documents."));
    assert!(!view.loading);

    env.store.fail_lists(false);
    search.load_more().await.unwrap();
    let view = search.view();
    assert_eq!(view.documents.len(), 12);
    assert!(view.error.is_none());
}

#[tokio::test]
async fn filter_options_are_loaded_once() {
    let env = common::TestEnv::start();
    env.repo.create_major("Toán học").await.unwrap();
    env.repo.create_tag("Giáo trình").await.unwrap();
    let search = env.search(10);

    search.load_filter_options().await.unwrap();
    let view = search.view();
    assert_eq!(view.majors.len(), 1);
    assert_eq!(view.tags[0].name, "Giáo trình");

    env.store.fail_lists(true);
    assert!(search.load_filter_options().await.is_err());
    assert_eq!(
        search.view().error.as_deref(),
        Some("Failed to load filter options.")
    );
    assert_eq!(search.view().majors.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn load_more_while_loading_is_ignored() {
    let env = common::TestEnv::start();
    env.insert_documents(30, "Giáo trình", "Tài liệu");
    let search = env.search(10);
    search.submit("").await.unwrap();
    env.store.script_list_delays([Duration::from_millis(300)]);

    let first = {
        let search = search.clone();
        tokio::spawn(async move { search.load_more().await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(search.view().loading);
    search.load_more().await.unwrap();
    first.await.unwrap().unwrap();

    assert_eq!(env.store.list_calls(), 2);
    let view = search.view();
    assert_eq!(view.documents.len(), 20);
    assert!(!view.loading);
}

#[tokio::test(start_paused = true)]
async fn dropped_load_more_does_not_block_pagination() {
    let env = common::TestEnv::start();
    env.insert_documents(30, "Giáo trình", "Tài liệu");
    let search = env.search(10);
    search.submit("").await.unwrap();
    env.store.script_list_delays([Duration::from_millis(300)]);

    let abandoned = tokio::time::timeout(Duration::from_millis(50), search.load_more()).await;
    assert!(abandoned.is_err());
    assert!(!search.view().loading);

    search.load_more().await.unwrap();
    assert_eq!(env.store.list_calls(), 3);
    assert_eq!(search.view().documents.len(), 20);
}

#[tokio::test]
async fn blank_term_filter_change_does_not_query() {
    let env = common::TestEnv::start();
    env.insert_documents(3, "Giáo trình", "Tài liệu");
    let search = env.search(10);
    search.submit("  ").await.unwrap();

    search
        .set_filter(FilterChange::Sort(SortOrder::Oldest))
        .await
        .unwrap();
    assert_eq!(env.store.list_calls(), 1);
}
