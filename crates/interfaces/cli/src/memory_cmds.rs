use std::io;
use std::io::IsTerminal;
use std::io::Write;

use anyhow::{Result, bail};

use recall_config::AppConfig;
use recall_memory::{EmbedFn, MemoryService};

pub(crate) async fn run_memory_add(
    memory: &MemoryService,
    embed_fn: &EmbedFn,
    owner_id: &str,
    text: &str,
) -> Result<()> {
    let id = memory.remember(owner_id, text, embed_fn).await?;
    println!("stored memory {id}");
    Ok(())
}

pub(crate) async fn run_memory_search(
    memory: &MemoryService,
    embed_fn: &EmbedFn,
    text: &str,
    k: usize,
) -> Result<()> {
    let matches = memory.recall(text, embed_fn, k).await?;
    if matches.is_empty() {
        println!("(no memories)");
        return Ok(());
    }
    for m in &matches {
        println!("[{:>4}] {:>10.4}  {}", m.vector_id, m.distance, m.text);
    }
    Ok(())
}

pub(crate) async fn run_memory_stats(memory: &MemoryService, config: &AppConfig) -> Result<()> {
    let stats = memory.semantic().stats().await?;
    println!("── memory stats ─────────────────────────────────────");
    println!("  dimension:       {}", stats.dim);
    println!("  vectors:         {}", stats.vectors);
    println!("  records:         {}", stats.records);
    match memory.semantic().index_path() {
        Some(path) => println!("  index file:      {}", path.display()),
        None => println!("  index file:      (in memory)"),
    }
    println!("  records file:    {}", config.memory.records_path().display());

    println!();
    println!("── consistency ──────────────────────────────────────");
    println!("  orphaned vectors:        {}", stats.orphaned_vectors);
    println!("  orphan records skipped:  {}", stats.orphan_records_skipped);
    println!("  index persist failures:  {}", stats.persist_failures);
    if stats.vectors != stats.records {
        println!("  ⚠️  vector and record counts differ; the store resets on next start");
    }

    println!();
    println!("── record cache ─────────────────────────────────────");
    match stats.record_cache {
        Some(cache) => {
            println!("  cache cap:  {}", cache.capacity);
            println!("  cache len:  {}", cache.len);
            println!("  hits:       {}", cache.hits);
            println!("  misses:     {}", cache.misses);
            println!("  hit rate:   {:.1}%", cache.hit_rate_pct);
        }
        None => println!("  (record store has no read cache)"),
    }
    Ok(())
}

pub(crate) async fn run_memory_wipe(memory: &MemoryService, yes: bool) -> Result<()> {
    let total = memory.semantic().len().await;

    println!("⚠️  destructive operation: memory wipe");
    println!("- stored memories: {total}");

    if total == 0 {
        println!("no memories to wipe");
        return Ok(());
    }

    if !yes {
        if !io::stdin().is_terminal() {
            bail!("refusing destructive wipe in non-interactive mode without --yes");
        }

        print!("This permanently deletes every stored memory. Type 'WIPE' to continue: ");
        io::stdout().flush()?;

        let mut confirmation = String::new();
        io::stdin().read_line(&mut confirmation)?;
        if confirmation.trim() != "WIPE" {
            println!("memory wipe cancelled");
            return Ok(());
        }
    }

    let removed = memory.semantic().wipe().await?;
    println!("memory wipe complete: removed {removed} memories");
    Ok(())
}
