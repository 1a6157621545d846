//! Dependency resolution.
//!
//! `resolve` turns the manifest's constraint requests into one concrete version
//! per package name (`Backtracked`) plus a provenance tree (`Activated`).
//!
//! The search assigns packages in breadth-first order, taking the highest
//! version that satisfies the edge which first mentions a package. Every
//! assignment is a decision with a level; changes are recorded on a trail so
//! a failed branch can be undone. A conflict carries the set of decision
//! levels it depends on, and a decision whose level is not in that set is not
//! retried: the same conflict would come back with any of its other candidates.

pub mod constraint;

use crate::error::{Error, Requirement};
use crate::naming::Source;
use crate::registry::PackageIndex;
pub use constraint::{canonicalize_range, Constraint};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::{debug, trace};

/// One declared dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintRequest {
    pub name: String,
    pub version_constraint: String,
    pub source: Source,
}

impl ConstraintRequest {
    pub fn new(name: impl Into<String>, version_constraint: impl Into<String>, source: Source) -> Self {
        Self {
            name: name.into(),
            version_constraint: version_constraint.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub name: String,
    pub version: String,
    pub source: Source,
}

/// Flat assignment: exactly one resolved package per name.
pub type Backtracked = BTreeMap<String, ResolvedPackage>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivatedNode {
    pub name: String,
    pub version: String,
    pub source: Source,
    pub children: Activated,
}

/// Provenance forest: how each package was pulled in. A package shared by
/// several dependents appears under each of them.
pub type Activated = Vec<ActivatedNode>;

#[derive(Debug, Clone, Default)]
pub struct Resolved {
    pub backtracked: Backtracked,
    pub activated: Activated,
}

/// Collapse a provenance tree into its flat assignment.
///
/// Fails if the same name appears with two different versions or sources.
pub fn flatten(activated: &Activated) -> Result<Backtracked, Error> {
    fn walk(nodes: &Activated, out: &mut Backtracked) -> Result<(), Error> {
        for node in nodes {
            match out.get(&node.name) {
                Some(seen) if seen.version != node.version || seen.source != node.source => {
                    return Err(Error::Invariant(format!(
                        "{} appears as both {} ({}) and {} ({})",
                        node.name, seen.version, seen.source, node.version, node.source
                    )));
                }
                Some(_) => {}
                None => {
                    out.insert(
                        node.name.clone(),
                        ResolvedPackage {
                            name: node.name.clone(),
                            version: node.version.clone(),
                            source: node.source,
                        },
                    );
                }
            }
            walk(&node.children, out)?;
        }
        Ok(())
    }
    let mut out = Backtracked::new();
    walk(activated, &mut out)?;
    Ok(out)
}

pub fn resolve<I: PackageIndex + ?Sized>(
    index: &I,
    requests: &[ConstraintRequest],
) -> Result<Resolved, Error> {
    Resolver::new(index).resolve(requests)
}

#[derive(Debug, Clone)]
struct Edge {
    requester: String,
    request: ConstraintRequest,
    constraint: Constraint,
    /// Decision levels this edge exists because of: its requester and the
    /// requester's own ancestry.
    origin: BTreeSet<usize>,
}

impl Edge {
    fn requirement(&self) -> Requirement {
        Requirement {
            requester: self.requester.clone(),
            constraint: self.request.version_constraint.clone(),
        }
    }
}

#[derive(Debug)]
struct Assignment {
    version: String,
    source: Source,
    level: usize,
    origin: BTreeSet<usize>,
    requirers: Vec<Requirement>,
    dependencies: Vec<ConstraintRequest>,
}

#[derive(Debug)]
enum TrailEntry {
    Assigned(String),
    Required(String),
}

#[derive(Debug, Clone)]
enum Reason {
    Incompatible {
        name: String,
        existing: Requirement,
        incoming: Requirement,
    },
    NoMatch {
        name: String,
        requirement: Requirement,
    },
    SelfDependency {
        name: String,
        version: String,
    },
}

impl From<Reason> for Error {
    fn from(reason: Reason) -> Self {
        match reason {
            Reason::Incompatible {
                name,
                existing,
                incoming,
            } => Error::ResolutionConflict {
                name,
                existing,
                incoming,
            },
            Reason::NoMatch { name, requirement } => Error::NoMatchingVersion { name, requirement },
            Reason::SelfDependency { name, version } => {
                Error::DependencyCycle(vec![format!("{name} {version}"), name])
            }
        }
    }
}

#[derive(Debug)]
enum Failure {
    Conflict {
        culprits: BTreeSet<usize>,
        reason: Reason,
    },
    Fatal(Error),
}

type Search<T> = Result<T, Failure>;

pub struct Resolver<'a, I: PackageIndex + ?Sized> {
    index: &'a I,
    versions: HashMap<(Source, String), Vec<String>>,
    dependencies: HashMap<(Source, String, String), Vec<ConstraintRequest>>,
    assignments: BTreeMap<String, Assignment>,
    trail: Vec<TrailEntry>,
    depth: usize,
    backtracks: usize,
}

impl<'a, I: PackageIndex + ?Sized> Resolver<'a, I> {
    pub fn new(index: &'a I) -> Self {
        Self {
            index,
            versions: HashMap::new(),
            dependencies: HashMap::new(),
            assignments: BTreeMap::new(),
            trail: Vec::new(),
            depth: 0,
            backtracks: 0,
        }
    }

    /// Candidates abandoned during the last `resolve`.
    pub fn backtracks(&self) -> usize {
        self.backtracks
    }

    pub fn resolve(&mut self, requests: &[ConstraintRequest]) -> Result<Resolved, Error> {
        self.assignments.clear();
        self.trail.clear();
        self.depth = 0;
        self.backtracks = 0;

        // Last declaration of a name wins.
        let mut roots: BTreeMap<String, ConstraintRequest> = BTreeMap::new();
        for req in requests {
            roots.insert(req.name.clone(), req.clone());
        }

        let mut pending = VecDeque::new();
        for req in roots.values() {
            pending.push_back(Edge {
                requester: "root".to_string(),
                constraint: Constraint::parse(req.source, &req.name, &req.version_constraint)?,
                request: req.clone(),
                origin: BTreeSet::new(),
            });
        }

        match self.search(pending) {
            Ok(()) => {}
            Err(Failure::Fatal(e)) => return Err(e),
            Err(Failure::Conflict { reason, .. }) => return Err(reason.into()),
        }
        debug!(
            packages = self.assignments.len(),
            backtracks = self.backtracks,
            "resolution finished"
        );

        self.check_cycles()?;

        let backtracked = self
            .assignments
            .iter()
            .map(|(name, a)| {
                (
                    name.clone(),
                    ResolvedPackage {
                        name: name.clone(),
                        version: a.version.clone(),
                        source: a.source,
                    },
                )
            })
            .collect();
        let activated = roots.keys().filter_map(|name| self.activate(name)).collect();
        Ok(Resolved {
            backtracked,
            activated,
        })
    }

    fn search(&mut self, mut pending: VecDeque<Edge>) -> Search<()> {
        while let Some(edge) = pending.pop_front() {
            let name = edge.request.name.clone();
            let Some(assigned) = self.assignments.get_mut(&name) else {
                return self.decide(edge, pending);
            };
            let compatible =
                assigned.source == edge.request.source && edge.constraint.matches(&assigned.version);
            if !compatible {
                let mut culprits = edge.origin.clone();
                culprits.insert(assigned.level);
                culprits.extend(assigned.origin.iter().copied());
                let existing = assigned.requirers.first().cloned().unwrap_or_else(|| Requirement {
                    requester: "root".into(),
                    constraint: assigned.version.clone(),
                });
                trace!(package = %name, version = %assigned.version, incoming = %edge.request.version_constraint, "conflict");
                return Err(Failure::Conflict {
                    culprits,
                    reason: Reason::Incompatible {
                        name,
                        existing,
                        incoming: edge.requirement(),
                    },
                });
            }
            assigned.requirers.push(edge.requirement());
            self.trail.push(TrailEntry::Required(name));
        }
        Ok(())
    }

    fn decide(&mut self, edge: Edge, pending: VecDeque<Edge>) -> Search<()> {
        let candidates = self.candidates(&edge).map_err(Failure::Fatal)?;
        if candidates.is_empty() {
            return Err(Failure::Conflict {
                culprits: edge.origin.clone(),
                reason: Reason::NoMatch {
                    name: edge.request.name.clone(),
                    requirement: edge.requirement(),
                },
            });
        }

        let level = self.depth;
        self.depth += 1;
        let result = self.try_candidates(&edge, level, candidates, pending);
        if result.is_err() {
            self.depth -= 1;
        }
        result
    }

    fn try_candidates(
        &mut self,
        edge: &Edge,
        level: usize,
        candidates: Vec<String>,
        pending: VecDeque<Edge>,
    ) -> Search<()> {
        let name = &edge.request.name;
        let source = edge.request.source;
        let mut origin = edge.origin.clone();
        origin.insert(level);

        let mut implicated: BTreeSet<usize> = BTreeSet::new();
        let mut last_reason = None;
        for version in candidates {
            let deps = self
                .package_dependencies(source, name, &version)
                .map_err(Failure::Fatal)?;
            // A version that requires itself is unusable; older ones may not be.
            if deps.iter().any(|dep| dep.name == *name) {
                trace!(package = %name, %version, "candidate depends on itself; skipping");
                last_reason = Some(Reason::SelfDependency {
                    name: name.clone(),
                    version: version.clone(),
                });
                continue;
            }
            let mut next = pending.clone();
            for dep in &deps {
                let constraint = Constraint::parse(dep.source, &dep.name, &dep.version_constraint)
                    .map_err(Failure::Fatal)?;
                next.push_back(Edge {
                    requester: format!("{name} {version}"),
                    request: dep.clone(),
                    constraint,
                    origin: origin.clone(),
                });
            }

            let mark = self.trail.len();
            debug!(package = %name, %version, level, "trying candidate");
            self.assignments.insert(
                name.clone(),
                Assignment {
                    version: version.clone(),
                    source,
                    level,
                    origin: edge.origin.clone(),
                    requirers: vec![edge.requirement()],
                    dependencies: deps,
                },
            );
            self.trail.push(TrailEntry::Assigned(name.clone()));

            match self.search(next) {
                Ok(()) => return Ok(()),
                Err(Failure::Fatal(e)) => return Err(Failure::Fatal(e)),
                Err(Failure::Conflict { culprits, reason }) => {
                    self.undo(mark);
                    self.backtracks += 1;
                    if !culprits.contains(&level) {
                        trace!(package = %name, level, "conflict does not involve this decision; backjumping");
                        return Err(Failure::Conflict { culprits, reason });
                    }
                    implicated.extend(culprits.into_iter().filter(|l| *l != level));
                    last_reason = Some(reason);
                }
            }
        }

        implicated.extend(edge.origin.iter().copied());
        let reason = last_reason.unwrap_or_else(|| Reason::NoMatch {
            name: name.clone(),
            requirement: edge.requirement(),
        });
        Err(Failure::Conflict {
            culprits: implicated,
            reason,
        })
    }

    fn undo(&mut self, mark: usize) {
        while self.trail.len() > mark {
            match self.trail.pop() {
                Some(TrailEntry::Assigned(name)) => {
                    self.assignments.remove(&name);
                }
                Some(TrailEntry::Required(name)) => {
                    if let Some(a) = self.assignments.get_mut(&name) {
                        a.requirers.pop();
                    }
                }
                None => break,
            }
        }
    }

    fn candidates(&mut self, edge: &Edge) -> Result<Vec<String>, Error> {
        match &edge.constraint {
            Constraint::Tag(tag) => Ok(vec![tag.clone()]),
            Constraint::Any(_) => {
                let all = self.available_versions(edge.request.source, &edge.request.name)?;
                Ok(all
                    .iter()
                    .filter(|v| edge.constraint.matches(v))
                    .cloned()
                    .collect())
            }
        }
    }

    /// Published versions, highest first. Versions that are not valid semver are ignored.
    fn available_versions(&mut self, source: Source, name: &str) -> Result<&[String], Error> {
        let key = (source, name.to_string());
        if !self.versions.contains_key(&key) {
            let raw = self.index.versions(source, name)?;
            let mut parsed: Vec<Version> = Vec::with_capacity(raw.len());
            for v in raw {
                match Version::parse(&v) {
                    Ok(ver) => parsed.push(ver),
                    Err(_) => debug!(package = %name, version = %v, "skipping non-semver version"),
                }
            }
            parsed.sort_by(|a, b| b.cmp(a));
            parsed.dedup();
            self.versions
                .insert(key.clone(), parsed.into_iter().map(|v| v.to_string()).collect());
        }
        Ok(self.versions.get(&key).map(Vec::as_slice).unwrap_or_default())
    }

    fn package_dependencies(
        &mut self,
        source: Source,
        name: &str,
        version: &str,
    ) -> Result<Vec<ConstraintRequest>, Error> {
        let key = (source, name.to_string(), version.to_string());
        if let Some(hit) = self.dependencies.get(&key) {
            return Ok(hit.clone());
        }
        let deps = self.index.dependencies(source, name, version)?;
        self.dependencies.insert(key, deps.clone());
        Ok(deps)
    }

    fn check_cycles(&self) -> Result<(), Error> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        fn visit<'n>(
            name: &'n str,
            assignments: &'n BTreeMap<String, Assignment>,
            marks: &mut HashMap<&'n str, Mark>,
            path: &mut Vec<&'n str>,
        ) -> Result<(), Error> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|p| *p == name).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(name.to_string());
                    return Err(Error::DependencyCycle(cycle));
                }
                None => {}
            }
            marks.insert(name, Mark::Visiting);
            path.push(name);
            if let Some(a) = assignments.get(name) {
                for dep in &a.dependencies {
                    visit(&dep.name, assignments, marks, path)?;
                }
            }
            path.pop();
            marks.insert(name, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        let mut path = Vec::new();
        for name in self.assignments.keys() {
            visit(name, &self.assignments, &mut marks, &mut path)?;
        }
        Ok(())
    }

    fn activate(&self, name: &str) -> Option<ActivatedNode> {
        let a = self.assignments.get(name)?;
        let mut children: Vec<ActivatedNode> = a
            .dependencies
            .iter()
            .filter_map(|d| self.activate(&d.name))
            .collect();
        children.sort_by(|x, y| x.name.cmp(&y.name));
        children.dedup_by(|x, y| x.name == y.name);
        Some(ActivatedNode {
            name: name.to_string(),
            version: a.version.clone(),
            source: a.source,
            children,
        })
    }
}
