//! Shared fixtures: a small metamodel exercising every relationship shape,
//! an empty in-memory backend, and a repository wired over both.

#![allow(dead_code)]

use std::sync::Arc;

use polystore::{
    ChangeKind, ChangeRecord, ClassMeta, DataRepository, MemoryChangeLogger, MemoryDataSource,
    MetaKeyProvider, PropertyMeta, PropertyType, Record, StaticMetaRegistry, Value,
};

pub struct Fixture {
    pub ds: Arc<MemoryDataSource>,
    pub registry: Arc<StaticMetaRegistry>,
    pub logger: Arc<MemoryChangeLogger>,
    pub repo: DataRepository,
}

pub fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let mut reg = StaticMetaRegistry::default();

    reg.register(
        ClassMeta::new("Region")
            .namespace("app")
            .property(PropertyMeta::new("id", PropertyType::String))
            .property(PropertyMeta::new("name", PropertyType::String))
            .keys(&["id"]),
    );
    reg.register(
        ClassMeta::new("Customer")
            .namespace("app")
            .property(PropertyMeta::new("id", PropertyType::String))
            .property(PropertyMeta::new("name", PropertyType::String))
            .property(PropertyMeta::reference("region", "Region"))
            .keys(&["id"]),
    );

    let order = reg.register(
        ClassMeta::new("Order")
            .namespace("app")
            .property(PropertyMeta::new("id", PropertyType::Guid).autoassigned())
            .property(PropertyMeta::new("status", PropertyType::String).default_value("new"))
            .property(PropertyMeta::new("paid", PropertyType::Boolean))
            .property(PropertyMeta::new("total", PropertyType::Real))
            .property(PropertyMeta::reference("customer", "Customer"))
            .property(PropertyMeta::new("placed_at", PropertyType::DateTime))
            .keys(&["id"]),
    );
    reg.register(
        ClassMeta::new("RushOrder")
            .namespace("app")
            .ancestor(order)
            .property(PropertyMeta::new("id", PropertyType::Guid).autoassigned())
            .property(PropertyMeta::new("status", PropertyType::String).default_value("new"))
            .property(PropertyMeta::new("paid", PropertyType::Boolean))
            .property(PropertyMeta::new("total", PropertyType::Real))
            .property(PropertyMeta::reference("customer", "Customer"))
            .property(PropertyMeta::new("placed_at", PropertyType::DateTime))
            .property(PropertyMeta::new("deadline", PropertyType::DateTime))
            .keys(&["id"]),
    );

    reg.register(
        ClassMeta::new("Counter")
            .namespace("app")
            .property(PropertyMeta::new("id", PropertyType::Int).autoassigned())
            .property(PropertyMeta::new("n", PropertyType::Int))
            .keys(&["id"]),
    );

    // One-to-many: department owns its employees through a back-reference.
    reg.register(
        ClassMeta::new("Department")
            .namespace("app")
            .property(PropertyMeta::new("id", PropertyType::String))
            .property(PropertyMeta::new("name", PropertyType::String))
            .property(
                PropertyMeta::collection("employees", "Employee")
                    .back_ref("dept_id")
                    .eager(),
            )
            .keys(&["id"]),
    );
    reg.register(
        ClassMeta::new("Employee")
            .namespace("app")
            .property(PropertyMeta::new("id", PropertyType::String))
            .property(PropertyMeta::new("name", PropertyType::String))
            .property(PropertyMeta::new("dept_id", PropertyType::String))
            .keys(&["id"]),
    );

    // Many-to-many: projects declare the link, workers mirror it without a
    // back_coll of their own (the symmetric strategy is inferred).
    reg.register(
        ClassMeta::new("Project")
            .namespace("app")
            .property(PropertyMeta::new("id", PropertyType::String))
            .property(PropertyMeta::new("name", PropertyType::String))
            .property(
                PropertyMeta::collection("members", "Worker")
                    .back_coll("projects")
                    .eager(),
            )
            .keys(&["id"]),
    );
    reg.register(
        ClassMeta::new("Worker")
            .namespace("app")
            .property(PropertyMeta::new("id", PropertyType::String))
            .property(PropertyMeta::new("name", PropertyType::String))
            .property(PropertyMeta::collection("projects", "Project").eager())
            .keys(&["id"]),
    );

    // Plain array: the playlist stores its track ids verbatim.
    reg.register(
        ClassMeta::new("Playlist")
            .namespace("app")
            .property(PropertyMeta::new("id", PropertyType::String))
            .property(PropertyMeta::new("name", PropertyType::String))
            .property(PropertyMeta::collection("tracks", "Track").eager())
            .keys(&["id"]),
    );
    reg.register(
        ClassMeta::new("Track")
            .namespace("app")
            .property(PropertyMeta::new("id", PropertyType::String))
            .property(PropertyMeta::new("title", PropertyType::String))
            .keys(&["id"]),
    );

    let registry = Arc::new(reg);
    let ds = Arc::new(MemoryDataSource::new());
    let logger = Arc::new(MemoryChangeLogger::new());
    let repo = DataRepository::new(
        ds.clone(),
        registry.clone(),
        Arc::new(MetaKeyProvider::new(registry.clone())),
    );

    Fixture {
        ds,
        registry,
        logger,
        repo,
    }
}

/// Build a record literal.
pub fn rec(pairs: &[(&str, Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// A stored row of `class` (canonical name) with the discriminator fields.
pub fn row(class: &str, pairs: &[(&str, Value)]) -> Record {
    let mut record = rec(pairs);
    record.insert("_class".to_string(), Value::String(class.to_string()));
    record.insert("_classVer".to_string(), Value::String("1".to_string()));
    record
}

/// Events of one kind, in emission order.
pub fn events_of(logger: &MemoryChangeLogger, kind: ChangeKind) -> Vec<ChangeRecord> {
    logger
        .records()
        .into_iter()
        .filter(|r| r.kind == kind)
        .collect()
}
