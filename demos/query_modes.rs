// Example: Query execution modes
// Run with: cargo run --example query_modes

use rustydao::{utils, DaoContext, Database, MemoryDatabase, Query, QueryTiming, RecordMapper};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    println!("=== RustyDAO Query Modes Example ===\n");

    let db = Arc::new(MemoryDatabase::new());
    let context = Arc::new(DaoContext::new(db.clone()));

    // 1. Create and fill a table
    println!("1. Creating and filling a 'users' table...");
    let statements = [
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER, active BOOLEAN)",
        "INSERT INTO users VALUES (1, 'Alice Johnson', 30, true), (2, 'Bob Smith', 25, true)",
        "INSERT INTO users VALUES (3, 'Charlie Brown', 35, false), (4, 'Diana Prince', 28, true)",
        "INSERT INTO users VALUES (5, 'Eve Adams', 32, true)",
    ];
    let count = utils::execute_sql_statements_in_tx(db.as_ref(), &statements)?;
    println!("Executed {} statement(s)\n", count);

    // 2. Watch every execution
    println!("2. Installing a query listener...");
    context.set_query_listener(Some(Arc::new(|sql: &str, timing: &QueryTiming| {
        println!(
            "   [{}] {} (db {:?}, total {:?})",
            timing.mode, sql, timing.db_query_time, timing.total_time
        );
    })));
    println!();

    // 3. Eager list
    println!("3. list(): active users older than 26...");
    let mut query = Query::new(
        context.clone(),
        Arc::new(RecordMapper),
        "SELECT id, name FROM users WHERE age > ? AND active = ?",
        vec![None::<String>, None],
    );
    query.set_parameter(0, 26)?;
    query.set_parameter(1, true)?;
    for record in query.list()? {
        println!("   {:?}", record.values);
    }
    println!();

    // 4. Cached lazy list
    println!("4. list_lazy(): rows decode on first access and stay cached...");
    let mut lazy = query.list_lazy()?;
    let first = lazy.get(0)?;
    let again = lazy.get(0)?;
    println!(
        "   size {}, same instance on repeat access: {}",
        lazy.size()?,
        Arc::ptr_eq(&first, &again)
    );
    lazy.close();
    println!();

    // 5. Uncached lazy list
    println!("5. list_lazy_uncached(): every access decodes again...");
    let mut uncached = query.list_lazy_uncached()?;
    let first = uncached.get(0)?;
    let again = uncached.get(0)?;
    println!(
        "   equal: {}, same instance: {}",
        first == again,
        Arc::ptr_eq(&first, &again)
    );
    uncached.close();
    println!();

    // 6. Auto-closing iterator
    println!("6. list_iterator(): closes itself after the last row...");
    let mut iter = query.list_iterator()?;
    for record in iter.by_ref() {
        println!("   {:?}", record?.values);
    }
    println!("   closed: {}\n", iter.is_closed());

    // 7. Paging through reserved LIMIT/OFFSET slots
    println!("7. Paging two users at a time...");
    let sql = "SELECT name FROM users LIMIT ? OFFSET ?";
    let layout = MemoryDatabase::describe_parameters(sql)?;
    let mut page = Query::new(
        context.clone(),
        Arc::new(RecordMapper),
        sql,
        vec![None::<String>; layout.count],
    );
    if let Some(position) = layout.limit_position {
        page = page.with_limit_position(position)?;
    }
    if let Some(position) = layout.offset_position {
        page = page.with_offset_position(position)?;
    }
    page.set_limit(2)?;
    for offset in [0, 2, 4] {
        page.set_offset(offset)?;
        let names: Vec<String> = page
            .list()?
            .into_iter()
            .map(|r| r.values[0].to_string())
            .collect();
        println!("   offset {}: {:?}", offset, names);
    }
    println!();

    // 8. Unique results
    println!("8. unique() and unique_or_throw() by primary key...");
    let mut by_id = Query::new(
        context.clone(),
        Arc::new(RecordMapper),
        "SELECT name FROM users WHERE id = ?",
        vec!["3"],
    );
    println!("   id 3: {:?}", by_id.unique()?.map(|r| r.values));
    by_id.set_parameter(0, 99)?;
    println!("   id 99: {:?}", by_id.unique()?);
    match by_id.unique_or_throw() {
        Ok(record) => println!("   unexpected: {:?}", record),
        Err(e) => println!("   unique_or_throw: {}", e),
    }
    println!();

    // 9. Clean up
    println!("9. Dropping the table...");
    db.exec_sql("DROP TABLE users")?;
    println!("Tables left: {:?}", db.table_names());

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
