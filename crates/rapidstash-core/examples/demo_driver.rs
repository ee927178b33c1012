//! Minimal end-to-end walkthrough: open a store, create a few named
//! objects, write and read them back, then unlink one and reopen to show
//! persistence.

use rapidstash_core::{StatKind, Store, StoreConfig};
use std::env;

fn main() -> rapidstash_core::Result<()> {
    tracing_subscriber::fmt::init();

    let path = env::args().nth(1).unwrap_or_else(|| "demo.rsdb".to_string());

    let store = Store::open(&path, StoreConfig::default())?;
    println!("opened {path} with {} live objects", store.len());

    let greeting = store.select(b"greeting")?;
    {
        let mut w = store.get_safe_writer(greeting)?;
        w.write(b"hello, rapidstash")?;
    }

    let counter = store.select(b"counter")?;
    {
        let mut w = store.get_safe_writer(counter)?;
        w.write(&42u64.to_le_bytes())?;
    }

    {
        let mut r = store.get_safe_reader(greeting)?;
        let bytes = r.read(17)?;
        println!("greeting = {:?}", String::from_utf8_lossy(&bytes));
    }

    {
        let mut r = store.get_safe_reader(counter)?;
        let count = r.read_u64()?;
        println!("counter = {count}");
    }

    println!(
        "writes: {} ({:.0} B/s)",
        store.count(StatKind::Writes),
        store.throughput(StatKind::Writes)
    );

    let scratch = store.select(b"scratch")?;
    {
        let mut w = store.get_safe_writer(scratch)?;
        w.write(b"temporary")?;
    }
    store.unlink(scratch)?;
    println!("unlinked scratch, now {} live objects", store.len());

    store.close()?;
    Ok(())
}
