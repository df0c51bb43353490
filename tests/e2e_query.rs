//! End-to-end query engine tests over the in-memory store.

use pretty_assertions::assert_eq;
use soulgraph::{
    DataMap, Direction, Error, MetaMap, Navigate, SoulGraph, SoulId, Value,
};

fn data(pairs: &[(&str, &str)]) -> DataMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::from(*v)))
        .collect()
}

#[tokio::test]
async fn alias_entry_with_data_and_metadata() -> soulgraph::Result<()> {
    let db = SoulGraph::in_memory();
    db.run(|tx| async move {
        let employee = tx
            .query("employee-1", true)
            .put(data(&[("name", "John Smith")]))
            .set_meta("foo", "bar");

        let ids = employee.resolve().await?;
        assert_eq!(ids.len(), 1);
        assert!(SoulId::is_valid(ids[0].as_str()));

        let meta = employee.meta().await?.remove(0);
        assert!(meta.contains_key("cdate"));
        assert!(meta.contains_key("mdate"));
        assert_eq!(meta.get("foo"), Some(&Value::from("bar")));

        // refetching through the alias lands on the same soul
        let refetch = tx.query("employee-1", false);
        assert_eq!(refetch.resolve().await?, ids);
        assert_eq!(refetch.get_one().await?, Some(data(&[("name", "John Smith")])));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn employee_supervisor_scenario() -> soulgraph::Result<()> {
    let db = SoulGraph::in_memory();
    db.run(|tx| async move {
        let supervisor = tx.query("employee-1", true).set_meta("name", "supervisor");
        let subordinates = supervisor
            .navigate(Navigate::key("subordinates").create())
            .set_meta("name", "subordinates");
        let employee = tx.query("employee-2", true).set_meta("name", "employee");

        subordinates.bind(&employee);
        employee.bind_keyed(&supervisor, Direction::North, "supervisor");

        // resolving one query drags its dependencies and descendants along
        employee.resolve().await?;

        let sup = supervisor.soul_ids().await?.remove(0);
        let sub = subordinates.soul_ids().await?.remove(0);
        let emp = employee.soul_ids().await?.remove(0);
        assert_ne!(sup, sub);
        assert_ne!(emp, sub);

        // supervisor is bound South to the collection and (mirrored from the
        // keyed NORTH binding) to the employee
        let mut expected = vec![sub.clone(), emp.clone()];
        expected.sort();
        assert_eq!(supervisor.south().resolve().await?, expected);
        assert_eq!(subordinates.south().resolve().await?, vec![emp.clone()]);
        assert_eq!(employee.key("supervisor").resolve().await?, vec![sup.clone()]);

        // re-navigating from the alias finds the same employee soul
        let renavigated = tx
            .query("employee-1", false)
            .key("subordinates")
            .south()
            .resolve()
            .await?;
        assert_eq!(renavigated, vec![emp.clone()]);

        // reads do not touch metadata
        let before: MetaMap = employee.meta().await?.remove(0);
        employee.get().await?;
        employee.keys().await?;
        let after: MetaMap = employee.meta().await?.remove(0);
        assert_eq!(before.get("mdate"), after.get("mdate"));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn transitive_cycle_is_detected() {
    let db = SoulGraph::in_memory();
    let result = db
        .run(|tx| async move {
            let a = tx.query("a", true);
            let b = tx.query("b", true);
            let c = tx.query("c", true);
            a.bind(&b);
            b.bind(&c);
            c.bind(&a);
            a.resolve().await?;
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(Error::CircularDependency { .. })));
}

#[tokio::test]
async fn unbind_removes_both_halves() -> soulgraph::Result<()> {
    let db = SoulGraph::in_memory();
    db.run(|tx| async move {
        let left = tx.query("left", true);
        let right = tx.query("right", true);
        left.bind_in(&right, Direction::East).resolve().await?;

        assert_eq!(left.east().count().await?, 1);
        assert_eq!(right.west().count().await?, 1);

        left.unbind(&right, Direction::East).resolve().await?;
        assert_eq!(left.east().count().await?, 0);
        assert_eq!(right.west().count().await?, 0);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn keyed_bindings_list_and_unbind_by_key() -> soulgraph::Result<()> {
    let db = SoulGraph::in_memory();
    db.run(|tx| async move {
        let order = tx.query("order-1", true);
        let customer = tx.query("customer-1", true);
        let invoice = tx.query("invoice-1", true);
        order.bind_keyed(&customer, Direction::North, "customer");
        order.bind_keyed(&invoice, Direction::South, "invoice");
        order.resolve().await?;

        assert_eq!(order.keys().await?, vec!["customer".to_string(), "invoice".to_string()]);
        assert!(!order.includes(&customer).await?);

        order.unbind_key("invoice").resolve().await?;
        assert_eq!(order.keys().await?, vec!["customer".to_string()]);
        assert_eq!(order.key("invoice").count().await?, 0);
        assert_eq!(invoice.north().count().await?, 0);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn reverse_navigation_creates_a_parent() -> soulgraph::Result<()> {
    let db = SoulGraph::in_memory();
    db.run(|tx| async move {
        let employee = tx.query("employee-1", true);
        let manager = employee.navigate(Navigate::key("manager").reverse().create());

        let emp = employee.resolve().await?.remove(0);
        let mgr = manager.resolve().await?.remove(0);
        assert_ne!(emp, mgr);

        // the created soul holds the keyed edge back to the origin
        let found = tx.soul(mgr.clone()).key("manager").resolve().await?;
        assert_eq!(found, vec![emp.clone()]);
        assert_eq!(tx.soul(mgr.clone()).north().resolve().await?, vec![emp.clone()]);
        assert_eq!(tx.soul(emp).south().resolve().await?, vec![mgr]);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn delete_cascades_through_the_graph() -> soulgraph::Result<()> {
    let db = SoulGraph::in_memory();
    db.run(|tx| async move {
        let hub = tx.query("hub", true).put(data(&[("kind", "hub")]));
        let spoke = tx.query("spoke", true);
        hub.bind_keyed(&spoke, Direction::South, "spoke-1");
        hub.resolve().await?;

        hub.delete().resolve().await?;

        assert_eq!(tx.query("hub", false).count().await?, 0);
        assert_eq!(spoke.north().count().await?, 0);
        // the spoke itself survives
        assert_eq!(spoke.count().await?, 1);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn navigation_without_create_stays_empty() -> soulgraph::Result<()> {
    let db = SoulGraph::in_memory();
    db.run(|tx| async move {
        let root = tx.query("root", true);
        assert_eq!(root.south().count().await?, 0);
        assert_eq!(root.key("missing").count().await?, 0);

        // the miss did not create anything
        assert_eq!(root.south().count().await?, 0);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn navigate_resolves_existing_souls_before_creating() -> soulgraph::Result<()> {
    let db = SoulGraph::in_memory();
    db.run(|tx| async move {
        let root = tx.query("root", true);
        let first = root.navigate(Navigate::direction(Direction::South).create());
        let a = first.resolve().await?.remove(0);

        // a second creating navigation finds the existing soul instead
        let second = root.navigate(Navigate::direction(Direction::South).create());
        assert_eq!(second.resolve().await?, vec![a]);
        assert_eq!(root.south().count().await?, 1);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn on_create_hook_sees_allocated_souls() -> soulgraph::Result<()> {
    use std::sync::{Arc, Mutex};

    let db = SoulGraph::in_memory();
    let seen: Arc<Mutex<Vec<SoulId>>> = Arc::default();
    let sink = seen.clone();

    db.run(move |tx| async move {
        let root = tx.query("root", true);
        let child = root.navigate(
            Navigate::key("profile")
                .create()
                .on_create(move |id| sink.lock().unwrap().push(id.clone())),
        );
        child.resolve().await
    })
    .await?;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(SoulId::is_valid(seen[0].as_str()));
    Ok(())
}
