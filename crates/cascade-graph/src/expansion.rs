//! Watcher expansion: turning one committed artifact into downstream tasks.

use std::collections::HashSet;

use cascade_core::{ActionKind, ArtifactId, ArtifactType, Cardinality, FlowError, Result, Task};

use crate::registry::{ArtifactSpec, Registry};

/// How one action reacts to a change of the source artifact.
#[derive(Debug, Clone)]
pub struct Reaction {
    /// Action to run on the downstream.
    pub action: ActionKind,
    /// Downstream cardinality of the action.
    pub cardinality: Cardinality,
    /// Downstream to create when none watches the source yet.
    pub target: ArtifactSpec,
    /// Upstream types the action needs besides the source.
    pub extra_dependencies: Vec<ArtifactType>,
}

/// Result of expanding one event.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    /// Tasks to enqueue, in reaction order.
    pub tasks: Vec<Task>,
    /// Artifacts created along the way.
    pub created: Vec<ArtifactId>,
}

enum Step {
    Rerun(ArtifactId),
    Attach(ArtifactId),
    Create,
}

/// A validated reaction: what to do and which extra upstreams to link.
struct Plan {
    step: Step,
    links: Vec<ArtifactId>,
}

impl Registry {
    /// Expand the watchers of `source` for each reaction, in order.
    ///
    /// Every reaction is validated before the graph is touched, so a
    /// consistency error leaves the registry unchanged.
    pub fn expand_watchers(&mut self, source: ArtifactId, reactions: &[Reaction]) -> Result<Expansion> {
        let mut plans = Vec::with_capacity(reactions.len());
        let mut planned_files = HashSet::new();

        for reaction in reactions {
            if reaction.cardinality == Cardinality::OneToMany {
                return Err(FlowError::UnsupportedFanOut {
                    action: reaction.action,
                });
            }

            let up = self.get(source)?;
            let step = match up.watchers(reaction.action) {
                [] => match self.find(reaction.target.artifact_type, &reaction.target.key().path) {
                    Some(existing) => {
                        self.check_watch(source, existing, reaction.action, reaction.cardinality)?;
                        Step::Attach(existing)
                    }
                    None => {
                        let file_path = reaction.target.file_path();
                        if self.find_by_file(&file_path).is_some() || !planned_files.insert(file_path.clone()) {
                            return Err(FlowError::ArtifactExists(file_path));
                        }
                        Step::Create
                    }
                },
                [only] => Step::Rerun(*only),
                many => {
                    return Err(FlowError::DuplicateImpact {
                        source_path: up.path(),
                        action: reaction.action,
                        count: many.len(),
                    })
                }
            };
            let links = self.missing_links(&step, &reaction.extra_dependencies)?;
            plans.push(Plan { step, links });
        }

        let mut expansion = Expansion::default();
        for (reaction, plan) in reactions.iter().zip(plans) {
            let target = match plan.step {
                Step::Rerun(target) => target,
                Step::Attach(target) => {
                    self.add_watch(source, target, reaction.action, reaction.cardinality)?;
                    target
                }
                Step::Create => {
                    let target = self.create(reaction.target.clone())?;
                    self.add_watch(source, target, reaction.action, reaction.cardinality)?;
                    expansion.created.push(target);
                    target
                }
            };
            for upstream in plan.links {
                if upstream != target {
                    self.link_dependency(target, upstream)?;
                }
            }
            expansion
                .tasks
                .push(Task::from_dependency(reaction.action, source, target));
        }

        tracing::debug!(
            "Expanded {} into {} task(s), {} new artifact(s)",
            source,
            expansion.tasks.len(),
            expansion.created.len()
        );
        Ok(expansion)
    }

    /// Extra upstreams the target does not depend on yet.
    ///
    /// An upstream that appeared after the target was created is picked up on
    /// the next expansion. An existing link of the same type is kept.
    fn missing_links(&self, step: &Step, extra_dependencies: &[ArtifactType]) -> Result<Vec<ArtifactId>> {
        let target = match step {
            Step::Rerun(id) | Step::Attach(id) => Some(self.get(*id)?),
            Step::Create => None,
        };

        let mut links = Vec::new();
        for dependency_type in extra_dependencies {
            if target.is_some_and(|t| t.dependency(*dependency_type).is_ok()) {
                continue;
            }
            if let Some(upstream) = self.single_of_type(*dependency_type)? {
                links.push(upstream);
            }
        }
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reaction(action: ActionKind, artifact_type: ArtifactType, path: &str) -> Reaction {
        Reaction {
            action,
            cardinality: Cardinality::OneToOne,
            target: ArtifactSpec::from_path(artifact_type, path),
            extra_dependencies: Vec::new(),
        }
    }

    fn committed_raw(registry: &mut Registry) -> ArtifactId {
        let raw = registry
            .create(ArtifactSpec::from_path(ArtifactType::RawRequirement, "docs/X.md"))
            .unwrap();
        registry.stage(raw, "build a todo app").unwrap();
        registry.commit(raw).unwrap();
        raw
    }

    #[test]
    fn test_first_expansion_creates_downstream() {
        let mut registry = Registry::default();
        let raw = committed_raw(&mut registry);

        let expansion = registry
            .expand_watchers(raw, &[reaction(ActionKind::WritePrd, ArtifactType::Prd, "docs/X.md")])
            .unwrap();

        assert_eq!(expansion.tasks.len(), 1);
        let task = &expansion.tasks[0];
        assert_eq!(task.action, ActionKind::WritePrd);
        assert_eq!(task.source, Some(raw));

        let prd = registry.get(task.target).unwrap();
        assert_eq!(prd.artifact_type(), ArtifactType::Prd);
        assert_eq!(prd.name(), "X.md");
        assert_eq!(expansion.created, vec![task.target]);
        assert_eq!(registry.get(raw).unwrap().watchers(ActionKind::WritePrd), &[task.target]);
    }

    #[test]
    fn test_existing_watcher_is_rerun() {
        let mut registry = Registry::default();
        let raw = committed_raw(&mut registry);
        let reactions = [reaction(ActionKind::WritePrd, ArtifactType::Prd, "docs/X.md")];

        let first = registry.expand_watchers(raw, &reactions).unwrap();
        let second = registry.expand_watchers(raw, &reactions).unwrap();

        assert_eq!(second.tasks.len(), 1);
        assert_eq!(second.tasks[0].target, first.tasks[0].target);
        assert!(second.created.is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unwatched_existing_target_is_attached() {
        let mut registry = Registry::default();
        let raw = committed_raw(&mut registry);
        let prd = registry
            .create(ArtifactSpec::from_path(ArtifactType::Prd, "docs/X.md"))
            .unwrap();

        let expansion = registry
            .expand_watchers(raw, &[reaction(ActionKind::WritePrd, ArtifactType::Prd, "docs/X.md")])
            .unwrap();
        assert_eq!(expansion.tasks[0].target, prd);
        assert!(expansion.created.is_empty());
    }

    #[test]
    fn test_fan_out_is_unsupported() {
        let mut registry = Registry::default();
        let raw = committed_raw(&mut registry);
        let mut fan_out = reaction(ActionKind::WriteCode, ArtifactType::Code, "src/main.py");
        fan_out.cardinality = Cardinality::OneToMany;

        let err = registry.expand_watchers(raw, &[fan_out]).unwrap_err();
        assert!(matches!(err, FlowError::UnsupportedFanOut { action: ActionKind::WriteCode }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_impact_leaves_graph_untouched() {
        let mut registry = Registry::default();
        let prd = registry
            .create(ArtifactSpec::from_path(ArtifactType::Prd, "docs/X.md"))
            .unwrap();
        let d1 = registry
            .create(ArtifactSpec::from_path(ArtifactType::Design, "docs/X.md"))
            .unwrap();
        let d2 = registry
            .create(ArtifactSpec::from_path(ArtifactType::Design, "docs/Y.md"))
            .unwrap();
        registry
            .add_watch(prd, d1, ActionKind::WriteDesign, Cardinality::OneToMany)
            .unwrap();
        registry
            .add_watch(prd, d2, ActionKind::WriteDesign, Cardinality::OneToMany)
            .unwrap();

        let reactions = [
            reaction(ActionKind::WriteTasks, ArtifactType::Tasks, "docs/X.md"),
            reaction(ActionKind::WriteDesign, ArtifactType::Design, "docs/X.md"),
        ];
        let err = registry.expand_watchers(prd, &reactions).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateImpact { count: 2, .. }));
        assert_eq!(registry.len(), 3);
        assert!(registry.get(prd).unwrap().watchers(ActionKind::WriteTasks).is_empty());
    }

    #[test]
    fn test_extra_dependency_is_linked_one_sided() {
        let mut registry = Registry::default();
        let system = registry
            .create(ArtifactSpec::from_path(ArtifactType::SystemDesign, "docs/system_design.md"))
            .unwrap();
        let prd = registry
            .create(ArtifactSpec::from_path(ArtifactType::Prd, "docs/X.md"))
            .unwrap();

        let mut write_design = reaction(ActionKind::WriteDesign, ArtifactType::Design, "docs/X.md");
        write_design.extra_dependencies = vec![ArtifactType::SystemDesign];
        let expansion = registry.expand_watchers(prd, &[write_design]).unwrap();

        let design = expansion.tasks[0].target;
        assert_eq!(
            registry.dependency(design, ArtifactType::SystemDesign).unwrap().id(),
            system
        );
        assert_eq!(registry.get(system).unwrap().watched_by().count(), 0);
    }

    #[test]
    fn test_ambiguous_extra_dependency_fails_before_creation() {
        let mut registry = Registry::default();
        for path in ["docs/a.md", "docs/b.md"] {
            registry
                .create(ArtifactSpec::from_path(ArtifactType::SystemDesign, path))
                .unwrap();
        }
        let prd = registry
            .create(ArtifactSpec::from_path(ArtifactType::Prd, "docs/X.md"))
            .unwrap();

        let mut write_design = reaction(ActionKind::WriteDesign, ArtifactType::Design, "docs/X.md");
        write_design.extra_dependencies = vec![ArtifactType::SystemDesign];
        let err = registry.expand_watchers(prd, &[write_design]).unwrap_err();

        assert!(matches!(err, FlowError::AmbiguousDependency { count: 2, .. }));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_rerun_links_late_extra_dependency() {
        let mut registry = Registry::default();
        let prd = registry
            .create(ArtifactSpec::from_path(ArtifactType::Prd, "docs/X.md"))
            .unwrap();
        let mut write_design = reaction(ActionKind::WriteDesign, ArtifactType::Design, "docs/X.md");
        write_design.extra_dependencies = vec![ArtifactType::SystemDesign];

        let first = registry.expand_watchers(prd, &[write_design.clone()]).unwrap();
        let design = first.tasks[0].target;
        assert!(registry.dependency(design, ArtifactType::SystemDesign).is_err());

        let system = registry
            .create(ArtifactSpec::from_path(ArtifactType::SystemDesign, "docs/system_design.md"))
            .unwrap();
        let second = registry.expand_watchers(prd, &[write_design.clone()]).unwrap();
        assert_eq!(second.tasks[0].target, design);
        assert_eq!(
            registry.dependency(design, ArtifactType::SystemDesign).unwrap().id(),
            system
        );

        // a second system design neither replaces the link nor blocks the rerun
        registry
            .create(ArtifactSpec::from_path(ArtifactType::SystemDesign, "docs/other.md"))
            .unwrap();
        let third = registry.expand_watchers(prd, &[write_design]).unwrap();
        assert_eq!(third.tasks[0].target, design);
        assert_eq!(
            registry.dependency(design, ArtifactType::SystemDesign).unwrap().id(),
            system
        );
    }

    #[test]
    fn test_attach_links_extra_dependency() {
        let mut registry = Registry::default();
        let system = registry
            .create(ArtifactSpec::from_path(ArtifactType::SystemDesign, "docs/system_design.md"))
            .unwrap();
        let prd = registry
            .create(ArtifactSpec::from_path(ArtifactType::Prd, "docs/X.md"))
            .unwrap();
        let design = registry
            .create(ArtifactSpec::from_path(ArtifactType::Design, "docs/X.md"))
            .unwrap();

        let mut write_design = reaction(ActionKind::WriteDesign, ArtifactType::Design, "docs/X.md");
        write_design.extra_dependencies = vec![ArtifactType::SystemDesign];
        let expansion = registry.expand_watchers(prd, &[write_design]).unwrap();

        assert_eq!(expansion.tasks[0].target, design);
        assert_eq!(
            registry.dependency(design, ArtifactType::SystemDesign).unwrap().id(),
            system
        );
    }

    #[test]
    fn test_file_collision_fails_before_mutation() {
        let mut registry = Registry::default();
        let raw = committed_raw(&mut registry);

        // code has no prefix, so its file lands where the PRD's would
        let reactions = [
            reaction(ActionKind::WritePrd, ArtifactType::Prd, "docs/X.md"),
            reaction(ActionKind::WriteCode, ArtifactType::Code, "docs/PRD_X.md"),
        ];
        let err = registry.expand_watchers(raw, &reactions).unwrap_err();
        assert!(matches!(err, FlowError::ArtifactExists(ref path) if path == "docs/PRD_X.md"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(raw).unwrap().watchers(ActionKind::WritePrd).is_empty());

        registry
            .create(ArtifactSpec::from_path(ArtifactType::Code, "docs/PRD_X.md"))
            .unwrap();
        let err = registry
            .expand_watchers(raw, &reactions[..1])
            .unwrap_err();
        assert!(matches!(err, FlowError::ArtifactExists(_)));
        assert_eq!(registry.len(), 2);
    }

    fn build_and_expand(names: &[String]) -> Vec<(ActionKind, String)> {
        let mut registry = Registry::default();
        let source = registry
            .create(ArtifactSpec::from_path(ArtifactType::Prd, "docs/X.md"))
            .unwrap();
        let reactions: Vec<Reaction> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let kind = ActionKind::ALL[1 + i % 4];
                let target_type = [ArtifactType::Design, ArtifactType::Tasks, ArtifactType::Code][i % 3];
                reaction(kind, target_type, &format!("out/{}_{}.md", i, name))
            })
            .collect();

        // Two reactions sharing an action kind would be a second watcher.
        let mut seen = std::collections::HashSet::new();
        let reactions: Vec<Reaction> = reactions
            .into_iter()
            .filter(|r| seen.insert(r.action))
            .collect();

        registry
            .expand_watchers(source, &reactions)
            .unwrap()
            .tasks
            .iter()
            .map(|t| (t.action, registry.get(t.target).unwrap().path()))
            .collect()
    }

    proptest! {
        #[test]
        fn prop_expansion_is_deterministic(names in proptest::collection::vec("[a-z]{1,6}", 0..6)) {
            let first = build_and_expand(&names);
            let second = build_and_expand(&names);
            prop_assert_eq!(first, second);
        }
    }
}
