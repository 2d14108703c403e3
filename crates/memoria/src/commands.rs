// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subcommand handlers. Results go to stdout, diagnostics to stderr.

use memoria_core::MemoriaError;
use memoria_memory::types::{ConversationTurn, Memory, MemoryFilter, MemorySource, SearchResult};
use memoria_memory::{Category, ExtractionOutcome, ExtractionStatus, MemoryManager};
use serde::Serialize;
use tokio::io::AsyncReadExt;

const ROLES: &[&str] = &["user", "assistant", "system"];

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), MemoriaError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| MemoriaError::Internal(format!("failed to serialize output: {e}")))?;
    println!("{rendered}");
    Ok(())
}

fn print_memory(memory: &Memory) {
    println!(
        "{}  [{} | importance {}] {}",
        memory.id, memory.category, memory.importance, memory.content
    );
}

pub async fn remember(
    manager: &MemoryManager,
    user: &str,
    text: &str,
    json: bool,
) -> Result<(), MemoriaError> {
    let memory = manager.remember(user, text, MemorySource::Manual).await?;
    if json {
        return print_json(&memory);
    }
    print_memory(&memory);
    Ok(())
}

pub async fn search(
    manager: &MemoryManager,
    user: &str,
    query: &str,
    limit: usize,
    context: bool,
    json: bool,
) -> Result<(), MemoriaError> {
    let response = manager.smart_search(user, query, limit).await;
    if json {
        return print_json(&response);
    }
    for (stage, message) in &response.stage_errors {
        eprintln!("warning: {stage} search failed: {message}");
    }
    if let Some(error) = &response.error {
        return Err(MemoriaError::Internal(error.clone()));
    }
    if context {
        print!("{}", MemoryManager::format_context(&response.results));
        return Ok(());
    }
    if response.results.is_empty() {
        println!("no memories found");
    }
    for (rank, result) in response.results.iter().enumerate() {
        print_result(rank + 1, result);
    }
    Ok(())
}

fn print_result(rank: usize, result: &SearchResult) {
    println!(
        "{rank:>2}. {:.3} ({}) [{} | importance {}] {}",
        result.score,
        result.match_type,
        result.memory.category,
        result.memory.importance,
        result.memory.content
    );
}

pub async fn extract(
    manager: &MemoryManager,
    user: &str,
    force: bool,
    json: bool,
) -> Result<(), MemoriaError> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .map_err(|e| MemoriaError::Internal(format!("failed to read stdin: {e}")))?;

    let turns = parse_turns(&input);
    if turns.is_empty() {
        return Err(MemoriaError::Parse("no conversation turns on stdin".to_string()));
    }

    let outcome = manager.smart_extraction(user, &turns, force).await;
    if json {
        return print_json(&outcome);
    }
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &ExtractionOutcome) {
    match outcome.status {
        ExtractionStatus::Skipped { reason } => println!("skipped: {reason}"),
        ExtractionStatus::Queued { priority } => {
            println!("queued at priority {priority} (runs before exit)")
        }
        ExtractionStatus::Completed => {
            let cached = if outcome.cached { ", cached" } else { "" };
            let strategy = outcome
                .strategy
                .map(|s| format!(", {s}"))
                .unwrap_or_default();
            println!(
                "stored {} ({} duplicate, confidence {:.2}{strategy}{cached})",
                outcome.stored.len(),
                outcome.duplicates,
                outcome.confidence
            );
            for memory in &outcome.stored {
                print_memory(memory);
            }
        }
    }
}

/// Parse `role: text` lines into turns.
///
/// Lines without a known role prefix continue the previous turn, or start
/// a user turn when there is none.
pub fn parse_turns(input: &str) -> Vec<ConversationTurn> {
    let mut turns: Vec<ConversationTurn> = Vec::new();
    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((role, text)) = split_role(line) {
            turns.push(ConversationTurn::new(role, text));
            continue;
        }
        match turns.last_mut() {
            Some(turn) => {
                turn.content.push('\n');
                turn.content.push_str(line);
            }
            None => turns.push(ConversationTurn::user(line)),
        }
    }
    turns
}

fn split_role(line: &str) -> Option<(String, &str)> {
    let (prefix, rest) = line.split_once(':')?;
    let role = prefix.trim().to_lowercase();
    if ROLES.contains(&role.as_str()) {
        Some((role, rest.trim()))
    } else {
        None
    }
}

/// Build a list filter from raw CLI values.
pub fn list_filter(
    category: Option<&str>,
    source: Option<&str>,
    min_importance: Option<u8>,
) -> Result<MemoryFilter, MemoriaError> {
    let source = source
        .map(|s| {
            s.parse::<MemorySource>()
                .map_err(|_| MemoriaError::Config(format!("unknown memory source: {s}")))
        })
        .transpose()?;
    Ok(MemoryFilter {
        category: category.map(Category::normalize),
        source,
        min_importance,
    })
}

pub async fn list(
    manager: &MemoryManager,
    user: &str,
    filter: &MemoryFilter,
    limit: usize,
    offset: usize,
    json: bool,
) -> Result<(), MemoriaError> {
    let memories = manager.store().get(user, filter, limit, offset).await?;
    if json {
        return print_json(&memories);
    }
    for memory in &memories {
        print_memory(memory);
    }
    Ok(())
}

pub async fn forget(manager: &MemoryManager, user: &str, id: &str) -> Result<(), MemoriaError> {
    if manager.forget(user, id).await? {
        println!("deleted {id}");
        Ok(())
    } else {
        Err(MemoriaError::Internal(format!("no memory {id} for user {user}")))
    }
}

pub async fn reindex(manager: &MemoryManager, json: bool) -> Result<(), MemoriaError> {
    let stats = manager.rebuild_index().await?;
    if json {
        return print_json(&stats);
    }
    println!(
        "indexed {} memories: {} topics, {} entities, {} relations, {} concepts",
        stats.memories, stats.topics, stats.entities, stats.relations, stats.concepts
    );
    Ok(())
}

pub async fn categories(manager: &MemoryManager, json: bool) -> Result<(), MemoriaError> {
    let categories = manager.categories().await;
    if json {
        return print_json(&categories);
    }
    for info in &categories {
        let kind = if info.is_core { "core" } else { "custom" };
        println!("{:<24} {:>6}  {kind}", info.category.as_str(), info.usage_count);
    }
    Ok(())
}

pub async fn stats(manager: &MemoryManager, user: &str, json: bool) -> Result<(), MemoriaError> {
    let stats = manager.stats(user).await?;
    if json {
        return print_json(&stats);
    }
    println!("memories:   {}", stats.memories);
    for (category, count) in &stats.categories {
        println!("  {:<22} {count}", category.as_str());
    }
    println!("indexed:    {}", stats.index.memories);
    println!("queued:     {}", stats.queued);
    Ok(())
}
