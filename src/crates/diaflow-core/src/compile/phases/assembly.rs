//! Phase 6: materialize the final executable diagram.

use crate::compile::context::{CompilationContext, CompilationPhase, CompilerPhase};
use crate::diagram::{CompiledPerson, DiagramInfo, ExecutableDiagram};
use std::collections::BTreeMap;

pub struct AssemblyPhase;

impl CompilerPhase for AssemblyPhase {
    fn phase(&self) -> CompilationPhase {
        CompilationPhase::Assembly
    }

    fn run(&self, ctx: &mut CompilationContext) {
        if !ctx.result.errors.is_empty() {
            return;
        }

        let mut persons = BTreeMap::new();
        for person in &ctx.domain.persons {
            persons.insert(
                person.id.clone(),
                CompiledPerson {
                    label: person.label.clone(),
                    llm_config: person.llm_config.clone(),
                },
            );
        }

        let metadata = DiagramInfo {
            id: ctx.domain.metadata.as_ref().and_then(|m| m.id.clone()),
            name: ctx.domain.metadata.as_ref().and_then(|m| m.name.clone()),
            start_nodes: ctx.start_nodes.clone(),
            person_nodes: ctx.person_nodes.clone(),
            node_dependencies: ctx.node_dependencies.clone(),
            parallel_groups: ctx.parallel_groups.clone(),
            compilation_warnings: ctx.result.warnings.iter().map(|w| w.message.clone()).collect(),
            persons,
        };

        ctx.result.diagram = Some(ExecutableDiagram::new(
            std::mem::take(&mut ctx.typed_nodes),
            std::mem::take(&mut ctx.edges),
            None,
            metadata,
        ));
    }
}
