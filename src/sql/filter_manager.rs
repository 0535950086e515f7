//! The multi-clause vectorized filter.
//!
//! A filter is a disjunction of clauses; a clause is a conjunction of term
//! functions. Each term takes the projection and the TID list of tuples
//! still passing its clause and restricts the list in place. Across clauses
//! the surviving lists union.
//!
//! Clause execution order is chosen by a policy object. The default runs in
//! insertion order; `run_filters` reports each clause's execution time to
//! the policy so an adaptive implementation can reorder between invocations.

use std::time::Instant;

use tracing::trace;

use super::error::Result;
use super::projection::VectorProjection;
use super::tuple_id_list::TupleIdList;
use super::vpi::VectorProjectionIterator;

/// One term of a clause: restrict `tids` to the tuples passing the term.
pub type TermFn = Box<dyn Fn(&VectorProjection, &mut TupleIdList) -> Result<()> + Send + Sync>;

/// Chooses the clause execution order and observes clause timings.
pub trait FilterPolicy: Send + Sync {
    /// The order to execute `num_clauses` clauses in this invocation.
    fn clause_order(&mut self, num_clauses: usize) -> Vec<usize>;

    /// Feedback: clause `clause` took `elapsed_micros` microseconds.
    fn observe(&mut self, clause: usize, elapsed_micros: u64);
}

/// The default policy: insertion order, feedback discarded.
#[derive(Debug, Default)]
pub struct InsertionOrderPolicy;

impl FilterPolicy for InsertionOrderPolicy {
    fn clause_order(&mut self, num_clauses: usize) -> Vec<usize> {
        (0..num_clauses).collect()
    }

    fn observe(&mut self, _clause: usize, _elapsed_micros: u64) {}
}

struct Clause {
    terms: Vec<TermFn>,
}

pub struct FilterManager {
    clauses: Vec<Clause>,
    policy: Box<dyn FilterPolicy>,
    finalized: bool,
}

impl FilterManager {
    /// A manager with the default insertion-order policy.
    pub fn new() -> Self {
        Self::with_policy(Box::new(InsertionOrderPolicy))
    }

    pub fn with_policy(policy: Box<dyn FilterPolicy>) -> Self {
        FilterManager {
            clauses: Vec::new(),
            policy,
            finalized: false,
        }
    }

    /// Open a new (disjunctive) clause; subsequent terms land in it.
    pub fn start_new_clause(&mut self) {
        debug_assert!(!self.finalized, "filter modified after finalization");
        self.clauses.push(Clause { terms: Vec::new() });
    }

    /// Add a (conjunctive) term to the current clause.
    pub fn insert_clause_term(&mut self, term: TermFn) {
        debug_assert!(!self.finalized, "filter modified after finalization");
        debug_assert!(!self.clauses.is_empty(), "term inserted before any clause");
        if let Some(clause) = self.clauses.last_mut() {
            clause.terms.push(term);
        }
    }

    /// Mark the filter complete. Idempotent.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn num_clauses(&self) -> usize {
        self.clauses.len()
    }

    /// Run the filter over the batch behind `vpi`, leaving the surviving
    /// tuples as the projection's filter.
    ///
    /// Each clause starts from the full active set and is restricted term by
    /// term; clause results union into the final set.
    pub fn run_filters(
        &mut self,
        vp: &mut VectorProjection,
        vpi: &mut VectorProjectionIterator,
    ) -> Result<()> {
        self.finalize();

        let capacity = vp.total_tuple_count();
        let mut input = TupleIdList::new(capacity);
        vp.copy_selections_to(&mut input);

        let mut surviving = TupleIdList::new(capacity);
        let order = self.policy.clause_order(self.clauses.len());
        for clause_idx in order {
            let clause = &self.clauses[clause_idx];
            let mut passing = input.clone();
            let start = Instant::now();
            for term in &clause.terms {
                if passing.is_empty() {
                    break;
                }
                term(vp, &mut passing)?;
            }
            let elapsed = start.elapsed().as_micros() as u64;
            trace!(clause = clause_idx, survivors = passing.len(), elapsed_micros = elapsed);
            self.policy.observe(clause_idx, elapsed);
            surviving.union_with(&passing);
        }

        vp.set_filter(&surviving);
        vpi.set_vector_projection(vp);
        Ok(())
    }
}

impl Default for FilterManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FilterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterManager")
            .field("clauses", &self.clauses.len())
            .field("finalized", &self.finalized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::value::GenericValue;
    use crate::sql::vector::Vector;
    use crate::sql::vector_ops;
    use crate::sql::TypeId;

    fn make_projection(values: &[i32]) -> VectorProjection {
        let mut vp = VectorProjection::new();
        vp.setup(&[TypeId::Integer]);
        vp.reset(values.len());
        for (i, &v) in values.iter().enumerate() {
            vp.column_mut(0).set::<i32>(i, v);
        }
        vp
    }

    fn term_lt(limit: i32) -> TermFn {
        Box::new(move |vp, tids| {
            let constant = Vector::constant(&GenericValue::Integer(Some(limit)), tids.capacity());
            vector_ops::select_lt(vp.column(0), &constant, tids)
        })
    }

    fn term_ge(limit: i32) -> TermFn {
        Box::new(move |vp, tids| {
            let constant = Vector::constant(&GenericValue::Integer(Some(limit)), tids.capacity());
            vector_ops::select_ge(vp.column(0), &constant, tids)
        })
    }

    #[test]
    fn test_single_clause_conjunction() {
        let mut vp = make_projection(&[1, 5, 9, 13, 17]);
        let mut vpi = VectorProjectionIterator::new();
        let mut fm = FilterManager::new();
        fm.start_new_clause();
        fm.insert_clause_term(term_ge(5));
        fm.insert_clause_term(term_lt(17));
        fm.run_filters(&mut vp, &mut vpi).expect("run");
        assert_eq!(
            vp.filter().expect("filtered").to_vec(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_clauses_are_disjunctive() {
        let mut vp = make_projection(&[1, 5, 9, 13, 17]);
        let mut vpi = VectorProjectionIterator::new();
        let mut fm = FilterManager::new();
        // x < 5 OR x >= 13
        fm.start_new_clause();
        fm.insert_clause_term(term_lt(5));
        fm.start_new_clause();
        fm.insert_clause_term(term_ge(13));
        fm.run_filters(&mut vp, &mut vpi).expect("run");
        assert_eq!(vp.filter().expect("filtered").to_vec(), vec![0, 3, 4]);
    }

    #[test]
    fn test_policy_observes_each_clause() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct CountingPolicy(Arc<AtomicUsize>);
        impl FilterPolicy for CountingPolicy {
            fn clause_order(&mut self, n: usize) -> Vec<usize> {
                // Reverse order: policies may reorder freely.
                (0..n).rev().collect()
            }
            fn observe(&mut self, _clause: usize, _micros: u64) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let observed = Arc::new(AtomicUsize::new(0));
        let mut vp = make_projection(&[1, 2, 3]);
        let mut vpi = VectorProjectionIterator::new();
        let mut fm = FilterManager::with_policy(Box::new(CountingPolicy(Arc::clone(&observed))));
        fm.start_new_clause();
        fm.insert_clause_term(term_lt(2));
        fm.start_new_clause();
        fm.insert_clause_term(term_ge(3));
        fm.run_filters(&mut vp, &mut vpi).expect("run");
        assert_eq!(observed.load(Ordering::Relaxed), 2);
        assert_eq!(vp.filter().expect("filtered").to_vec(), vec![0, 2]);
    }

    #[test]
    fn test_filter_restricts_existing_filter() {
        let mut vp = make_projection(&[1, 5, 9]);
        let mut pre = TupleIdList::new(3);
        pre.add(0);
        pre.add(1);
        vp.set_filter(&pre);
        let mut vpi = VectorProjectionIterator::new();
        let mut fm = FilterManager::new();
        fm.start_new_clause();
        fm.insert_clause_term(term_ge(5));
        fm.run_filters(&mut vp, &mut vpi).expect("run");
        // Tuple 2 passes the predicate but was not in the incoming filter.
        assert_eq!(vp.filter().expect("filtered").to_vec(), vec![1]);
    }
}
