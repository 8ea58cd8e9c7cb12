use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::fetch::Symbol;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub symbol: Symbol,
    pub enqueued_at: DateTime<Utc>,
}

/// FIFO of pending symbols; a symbol is present at most once.
#[derive(Debug, Default)]
pub struct RequestQueue {
    entries: VecDeque<QueueEntry>,
    members: HashSet<Symbol>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `symbol` unless it is already queued. Returns whether the queue changed.
    pub fn enqueue(&mut self, symbol: Symbol, now: DateTime<Utc>) -> bool {
        if !self.members.insert(symbol.clone()) {
            return false;
        }
        self.entries.push_back(QueueEntry {
            symbol,
            enqueued_at: now,
        });
        true
    }

    pub fn dequeue(&mut self) -> Option<QueueEntry> {
        let entry = self.entries.pop_front()?;
        self.members.remove(&entry.symbol);
        Some(entry)
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.members.contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything still waiting, returning the symbols in queue order.
    pub fn clear(&mut self) -> Vec<Symbol> {
        self.members.clear();
        self.entries.drain(..).map(|entry| entry.symbol).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(raw: &str) -> Symbol {
        Symbol::parse(raw).unwrap()
    }

    #[test]
    fn preserves_insertion_order() {
        let now = Utc::now();
        let mut queue = RequestQueue::new();
        for raw in ["AAPL", "MSFT", "GOOG"] {
            assert!(queue.enqueue(sym(raw), now));
        }

        let drained: Vec<String> = std::iter::from_fn(|| queue.dequeue())
            .map(|entry| entry.symbol.to_string())
            .collect();
        assert_eq!(drained, vec!["AAPL", "MSFT", "GOOG"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn rejects_duplicates_while_present() {
        let now = Utc::now();
        let mut queue = RequestQueue::new();
        assert!(queue.enqueue(sym("AAPL"), now));
        assert!(queue.enqueue(sym("MSFT"), now));
        assert!(!queue.enqueue(sym("aapl"), now));
        assert_eq!(queue.len(), 2);

        // Front entry keeps its original position.
        assert_eq!(queue.dequeue().map(|e| e.symbol), Some(sym("AAPL")));
        assert_eq!(queue.dequeue().map(|e| e.symbol), Some(sym("MSFT")));
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn symbol_can_return_after_dequeue() {
        let now = Utc::now();
        let mut queue = RequestQueue::new();
        queue.enqueue(sym("AAPL"), now);
        queue.dequeue();
        assert!(!queue.contains(&sym("AAPL")));
        assert!(queue.enqueue(sym("AAPL"), now));
    }

    #[test]
    fn never_holds_a_symbol_twice() {
        let now = Utc::now();
        let mut queue = RequestQueue::new();
        let script = ["A", "B", "A", "-", "A", "C", "B", "-", "-", "B", "B", "A"];
        for step in script {
            if step == "-" {
                queue.dequeue();
            } else {
                queue.enqueue(sym(step), now);
            }
        }

        let drained = queue.clear();
        let mut seen = HashSet::new();
        for symbol in &drained {
            assert!(seen.insert(symbol.clone()), "duplicate {}", symbol);
        }
        assert_eq!(drained, vec![sym("C"), sym("B"), sym("A")]);
    }

    #[test]
    fn clear_returns_pending_symbols() {
        let now = Utc::now();
        let mut queue = RequestQueue::new();
        queue.enqueue(sym("AAPL"), now);
        queue.enqueue(sym("MSFT"), now);
        assert_eq!(queue.clear(), vec![sym("AAPL"), sym("MSFT")]);
        assert!(queue.is_empty());
        assert!(!queue.contains(&sym("AAPL")));
    }
}
