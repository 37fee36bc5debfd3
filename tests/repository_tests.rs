//! End-to-end repository CRUD behavior over the in-memory backend:
//! polymorphic reads, value casting on writes, generated and defaulted
//! properties, and change-log emission.

mod common;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use polystore::{
    BoxError, ChangeKind, ChangeLogger, ChangeRecord, ClassRef, DataError, Filter, ListOptions,
    Record, SortSpec, Value,
};
use pretty_assertions::assert_eq;

use common::{events_of, fixture, rec, row};

fn seed_orders(f: &common::Fixture) {
    f.ds.seed(
        "app__Order",
        vec![
            row(
                "app.Order",
                &[
                    ("id", "o1".into()),
                    ("status", "open".into()),
                    ("total", Value::Real(10.0)),
                ],
            ),
            row(
                "app.RushOrder",
                &[
                    ("id", "r1".into()),
                    ("status", "open".into()),
                    ("total", Value::Real(99.0)),
                ],
            ),
            // A row of an unregistered class sharing the store; the
            // discriminator filter must keep it out of every result.
            row("app.Archived", &[("id", "x1".into())]),
        ],
    );
}

#[tokio::test]
async fn test_count_and_list_cover_descendants() {
    let f = fixture();
    seed_orders(&f);

    assert_eq!(f.repo.count("app.Order".into(), None).await.unwrap(), 2);
    assert_eq!(f.repo.count("app.RushOrder".into(), None).await.unwrap(), 1);

    let list = f
        .repo
        .get_list("app.Order".into(), ListOptions::default())
        .await
        .unwrap();
    assert_eq!(list.items.len(), 2);

    // Each row wraps with its own stored class, not the queried one.
    let rush = list
        .items
        .iter()
        .find(|i| i.id() == "r1")
        .expect("rush order listed under the base class");
    assert_eq!(rush.class_meta().get_name(), "RushOrder");

    let rush_only = f
        .repo
        .get_list("app.RushOrder".into(), ListOptions::default())
        .await
        .unwrap();
    assert_eq!(rush_only.items.len(), 1);
}

#[tokio::test]
async fn test_list_filter_sort_and_paging() {
    let f = fixture();
    seed_orders(&f);

    let options = ListOptions {
        filter: Some(Filter::Eq("status".into(), "open".into())),
        sort: vec![SortSpec::desc("total")],
        count: Some(1),
        count_total: true,
        ..ListOptions::default()
    };
    let page = f.repo.get_list("app.Order".into(), options).await.unwrap();
    assert_eq!(page.total, Some(2));
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id(), "r1");
}

#[tokio::test]
async fn test_get_item_by_id_and_by_item() {
    let f = fixture();
    seed_orders(&f);

    let item = f
        .repo
        .get_item("app.Order".into(), Some("o1"), 0)
        .await
        .unwrap()
        .expect("o1 exists");
    assert_eq!(item.get("status"), Some(&Value::String("open".into())));

    // Re-fetching through the item itself narrows by its identity.
    let again = f
        .repo
        .get_item(ClassRef::Item(&item), None, 0)
        .await
        .unwrap()
        .expect("same item");
    assert_eq!(again.id(), "o1");

    assert!(f
        .repo
        .get_item("app.Order".into(), Some("nope"), 0)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_create_casts_generates_and_defaults() {
    let f = fixture();
    f.ds.seed(
        "app__Customer",
        vec![row("app.Customer", &[("id", "c1".into()), ("name", "Acme".into())])],
    );

    let created = f
        .repo
        .create_item(
            "app.Order",
            rec(&[
                ("total", Value::String("12.5".into())),
                ("paid", Value::String("false".into())),
                ("customer", "c1".into()),
                ("placed_at", Value::String("2021-01-02".into())),
            ]),
            None,
            Some(&*f.logger as &dyn ChangeLogger),
            None,
        )
        .await
        .unwrap();

    // Autoassigned GUID key.
    assert!(!created.id().is_empty());
    // Casting: string to real, the literal "false" to false, date to midnight.
    assert_eq!(created.get("total"), Some(&Value::Real(12.5)));
    assert_eq!(created.get("paid"), Some(&Value::Bool(false)));
    assert_eq!(
        created.get("placed_at"),
        Some(&Value::DateTime(
            Utc.with_ymd_and_hms(2021, 1, 2, 0, 0, 0).unwrap()
        ))
    );
    // Default applied because the caller did not supply the field.
    assert_eq!(created.get("status"), Some(&Value::String("new".into())));
    assert_eq!(created.get("_class"), Some(&Value::String("app.Order".into())));

    // Default enrichment depth resolves the reference.
    let customer = created.reference("customer").expect("customer enriched");
    assert_eq!(customer.get("name"), Some(&Value::String("Acme".into())));

    let creates = events_of(&f.logger, ChangeKind::Create);
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].class_name, "app.Order");
    assert_eq!(creates[0].item_id, created.id());
    assert_eq!(creates[0].payload.get("total"), Some(&Value::Real(12.5)));

    // Round trip through the key.
    let fetched = f
        .repo
        .get_item("app.Order".into(), Some(created.id()), 0)
        .await
        .unwrap()
        .expect("created item readable");
    assert_eq!(fetched.get("total"), Some(&Value::Real(12.5)));
}

#[tokio::test]
async fn test_create_keeps_supplied_value_over_default() {
    let f = fixture();
    let created = f
        .repo
        .create_item(
            "app.Order",
            rec(&[("status", "rush".into())]),
            None,
            None,
            Some(0),
        )
        .await
        .unwrap();
    assert_eq!(created.get("status"), Some(&Value::String("rush".into())));
}

#[tokio::test]
async fn test_int_autoassignment_fails_loudly() {
    let f = fixture();
    let err = f
        .repo
        .create_item("app.Counter", rec(&[("n", Value::Int(1))]), None, None, None)
        .await
        .unwrap_err();
    assert_matches!(err, DataError::Validation(msg) if msg.contains("autoincrement"));
    // Nothing was written.
    assert!(f.ds.dump("app__Counter").is_empty());
}

#[tokio::test]
async fn test_edit_requires_id_and_casts() {
    let f = fixture();
    seed_orders(&f);

    let err = f
        .repo
        .edit_item("app.Order", "", Record::new(), None, None)
        .await
        .unwrap_err();
    assert_matches!(err, DataError::Validation(_));

    let edited = f
        .repo
        .edit_item(
            "app.Order",
            "o1",
            rec(&[("status", "held".into()), ("total", Value::Int(7))]),
            Some(&*f.logger as &dyn ChangeLogger),
            Some(0),
        )
        .await
        .unwrap();
    assert_eq!(edited.get("status"), Some(&Value::String("held".into())));
    assert_eq!(edited.get("total"), Some(&Value::Real(7.0)));

    let updates = events_of(&f.logger, ChangeKind::Update);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].item_id, "o1");

    let err = f
        .repo
        .edit_item("app.Order", "ghost", rec(&[("status", "x".into())]), None, None)
        .await
        .unwrap_err();
    assert_matches!(err, DataError::Storage { .. });
}

#[tokio::test]
async fn test_save_upserts_by_id_and_natural_key() {
    let f = fixture();

    // No row yet: save inserts.
    let saved = f
        .repo
        .save_item(
            "app.Region",
            Some("r1"),
            rec(&[("name", "East".into())]),
            None,
            None,
            Some(0),
        )
        .await
        .unwrap();
    assert_eq!(saved.id(), "r1");
    assert_eq!(f.ds.dump("app__Region").len(), 1);

    // Same key again: save updates in place.
    f.repo
        .save_item(
            "app.Region",
            Some("r1"),
            rec(&[("name", "East Coast".into())]),
            None,
            None,
            Some(0),
        )
        .await
        .unwrap();
    assert_eq!(f.ds.dump("app__Region").len(), 1);

    // No id, but the key property is in the data: natural-key upsert.
    f.repo
        .save_item(
            "app.Region",
            None,
            rec(&[("id", "r2".into()), ("name", "West".into())]),
            None,
            None,
            Some(0),
        )
        .await
        .unwrap();
    assert_eq!(f.ds.dump("app__Region").len(), 2);

    // No id and no key data: nothing to upsert by.
    let err = f
        .repo
        .save_item(
            "app.Region",
            None,
            rec(&[("name", "Nowhere".into())]),
            None,
            None,
            Some(0),
        )
        .await
        .unwrap_err();
    assert_matches!(err, DataError::Validation(_));
}

#[tokio::test]
async fn test_delete_removes_and_logs() {
    let f = fixture();
    seed_orders(&f);

    f.repo
        .delete_item("app.Order", "o1", Some(&*f.logger as &dyn ChangeLogger))
        .await
        .unwrap();
    assert_eq!(f.repo.count("app.Order".into(), None).await.unwrap(), 1);

    let deletes = events_of(&f.logger, ChangeKind::Delete);
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].item_id, "o1");
}

#[tokio::test]
async fn test_unknown_class_is_rejected() {
    let f = fixture();
    let err = f
        .repo
        .get_list("app.Nope".into(), ListOptions::default())
        .await
        .unwrap_err();
    assert_matches!(err, DataError::ClassNotFound(name) if name == "app.Nope");
}

struct FailingLogger;

#[async_trait::async_trait]
impl ChangeLogger for FailingLogger {
    async fn log_change(
        &self,
        _kind: ChangeKind,
        _class_name: &str,
        _item_id: &str,
        _payload: &Record,
    ) -> Result<ChangeRecord, BoxError> {
        Err("change sink unavailable".into())
    }
}

#[tokio::test]
async fn test_logging_failure_surfaces_after_write_persists() {
    let f = fixture();
    let failing = FailingLogger;

    let err = f
        .repo
        .create_item(
            "app.Order",
            rec(&[("total", Value::Real(5.0))]),
            None,
            Some(&failing),
            None,
        )
        .await
        .unwrap_err();
    assert_matches!(err, DataError::Logging { .. });

    // The insert is not rolled back by a logging failure.
    assert_eq!(f.ds.dump("app__Order").len(), 1);
}
