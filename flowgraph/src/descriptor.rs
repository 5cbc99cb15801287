//! Loading of data-defined node types from `.node` descriptor files.
//!
//! A descriptor holds one entry, or several wrapped in a `NodeList`:
//!
//! ```xml
//! <NodeList>
//!   <Script Name="Script:Counter" File="counter.rhai" Table="Counter"/>
//!   <SimpleScript Name="Script:Sum" File="sum.rhai" Table="Sum"/>
//!   <Composite File="add_three.xml"/>
//!   <Composite Name="Math:AddTwo">...</Composite>
//! </NodeList>
//! ```
//!
//! Script paths are relative to the descriptor. Composites are resolved last, in dependency
//! order, since they may use each other.

use crate::{
    blacklist::BlacklistAction,
    composite::CompositeNodeFactory,
    definition::GraphDefinition,
    error::{DefinitionError, ExtensionError},
    factory::NodeFactory,
    graph::GraphContext,
    script::{ScriptedNodeFactory, SimpleScriptedNodeFactory},
    xml::XmlElement,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const DESCRIPTOR_EXTENSION: &str = "node";

/// One parsed descriptor entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Script {
        name: String,
        file: PathBuf,
        table: String,
    },
    SimpleScript {
        name: String,
        file: PathBuf,
        table: String,
    },
    Composite(GraphDefinition),
}

impl Descriptor {
    pub fn name(&self) -> &str {
        match self {
            Descriptor::Script { name, .. } | Descriptor::SimpleScript { name, .. } => name,
            Descriptor::Composite(definition) => &definition.name,
        }
    }
}

/// Outcome of loading the descriptor directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtensionReport {
    /// Registered type names, in registration order.
    pub loaded: Vec<String>,
    /// Entries that were dropped, with the reason.
    pub dropped: Vec<(String, String)>,
    /// Entries silently skipped by the blacklist.
    pub vetoed: Vec<String>,
}

impl ExtensionReport {
    fn drop_entry(&mut self, name: &str, reason: impl ToString) {
        let reason = reason.to_string();
        log::warn!("[flow] dropping node type '{name}': {reason}");
        self.dropped.push((name.to_string(), reason));
    }
}

/// Parses a descriptor document into its entries. `base` resolves relative file references.
pub fn parse_descriptor(root: &XmlElement, base: &Path) -> Vec<Result<Descriptor, ExtensionError>> {
    if root.is("NodeList") {
        root.children
            .iter()
            .map(|entry| parse_entry(entry, base))
            .collect()
    } else {
        vec![parse_entry(root, base)]
    }
}

fn parse_entry(element: &XmlElement, base: &Path) -> Result<Descriptor, ExtensionError> {
    let attribute = |name: &'static str| {
        element
            .attr(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ExtensionError::MissingAttribute {
                element: element.name.clone(),
                attribute: name,
            })
    };

    if element.is("Script") || element.is("SimpleScript") {
        let name = attribute("Name")?.to_string();
        let file = base.join(attribute("File")?);
        let table = attribute("Table")?.to_string();
        Ok(if element.is("Script") {
            Descriptor::Script { name, file, table }
        } else {
            Descriptor::SimpleScript { name, file, table }
        })
    } else if element.is("Composite") {
        let definition = match element.attr("File") {
            Some(file) => GraphDefinition::load(&base.join(file.trim()))?,
            None => GraphDefinition::from_xml(element)?,
        };
        Ok(Descriptor::Composite(definition))
    } else {
        Err(ExtensionError::UnknownElement(element.name.clone()))
    }
}

/// Registers every descriptor entry found in `dir` (`*.node`, in file name order).
pub fn load_extensions(ctx: &GraphContext, dir: &Path) -> ExtensionReport {
    let mut report = ExtensionReport::default();
    let mut composites = Vec::new();

    for file in descriptor_files(dir) {
        let label = file.display().to_string();
        let root = match XmlElement::load(&file) {
            Ok(root) => root,
            Err(err) => {
                report.drop_entry(&label, err);
                continue;
            }
        };
        let base = file.parent().unwrap_or(dir);

        for entry in parse_descriptor(&root, base) {
            match entry {
                Ok(Descriptor::Composite(definition)) => composites.push(definition),
                Ok(descriptor) => register_script(ctx, descriptor, &mut report),
                Err(err) => report.drop_entry(&label, err),
            }
        }
    }

    resolve_composites(ctx, composites, &mut report);
    report
}

fn descriptor_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case(DESCRIPTOR_EXTENSION))
                    .unwrap_or(false)
            })
            .collect(),
        Err(_) => {
            log::debug!("[flow] no node descriptors at {}", dir.display());
            Vec::new()
        }
    };
    files.sort();
    files
}

fn register_script(ctx: &GraphContext, descriptor: Descriptor, report: &mut ExtensionReport) {
    let name = descriptor.name().to_string();
    let factory: Result<Rc<dyn NodeFactory>, ExtensionError> = match &descriptor {
        Descriptor::Script { file, table, .. } => ScriptedNodeFactory::load(file, table)
            .map(|f| Rc::new(f) as Rc<dyn NodeFactory>)
            .map_err(Into::into),
        Descriptor::SimpleScript { file, table, .. } => SimpleScriptedNodeFactory::load(file, table)
            .map(|f| Rc::new(f) as Rc<dyn NodeFactory>)
            .map_err(Into::into),
        Descriptor::Composite(_) => return,
    };
    match factory {
        Ok(factory) => register(ctx, &name, factory, report),
        Err(err) => report.drop_entry(&name, err),
    }
}

fn register(ctx: &GraphContext, name: &str, factory: Rc<dyn NodeFactory>, report: &mut ExtensionReport) {
    let mut registry = ctx.registry.borrow_mut();
    if let Some(BlacklistAction::Veto) = registry.blacklist().action(name) {
        report.vetoed.push(name.to_string());
        return;
    }
    let id = registry.register_type(name, factory);
    if id.is_valid() {
        // Renamed entries are reported under the name they were registered with.
        report.loaded.push(registry.type_name(id).to_string());
    } else {
        drop(registry);
        report.drop_entry(name, ExtensionError::Rejected(name.to_string()));
    }
}

/// Registers composites in dependency order.
///
/// A composite whose inner node types are not registered yet goes to the back of the queue.
/// Once more composites failed in a row than remain queued, no progress is possible and the
/// failing composite is dropped as part of a dependency cycle. Invalid composites are dropped
/// at once.
pub fn resolve_composites(ctx: &GraphContext, composites: Vec<GraphDefinition>, report: &mut ExtensionReport) {
    let mut queue: VecDeque<GraphDefinition> = composites.into();
    let mut failures = 0usize;

    while let Some(definition) = queue.pop_front() {
        let name = definition.name.clone();
        match CompositeNodeFactory::new(definition.clone(), ctx) {
            Ok(factory) => {
                failures = 0;
                register(ctx, &name, Rc::new(factory), report);
            }
            Err(err) if err.is_missing_dependency() => {
                failures += 1;
                if failures > queue.len() {
                    report.drop_entry(&name, CycleError(err));
                } else {
                    log::debug!("[flow] deferring composite '{name}': {err}");
                    queue.push_back(definition);
                }
            }
            Err(err) => report.drop_entry(&name, err),
        }
    }
}

struct CycleError(DefinitionError);

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unresolvable dependency ({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::Blacklist;
    use crate::factory::NativeNodeFactory;
    use crate::nodes::AddNode;
    use std::fs;

    fn composite(name: &str, inner: &str) -> String {
        format!(
            r#"<Composite Name="{name}">
                 <Nodes><Node Id="n" Class="{inner}"/></Nodes>
                 <Inputs><Port Name="A" Node="n" Port="A"/></Inputs>
                 <Outputs><Port Name="Out" Node="n" Port="Out"/></Outputs>
               </Composite>"#
        )
    }

    fn context() -> GraphContext {
        let ctx = GraphContext::default();
        ctx.registry
            .borrow_mut()
            .register_type("Math:Add", Rc::new(NativeNodeFactory::new(AddNode::boxed)));
        ctx
    }

    fn definition(source: &str) -> GraphDefinition {
        GraphDefinition::parse(source).unwrap()
    }

    #[test]
    fn node_lists_and_single_entries_parse() {
        let root = XmlElement::parse(
            r#"<NodeList>
                 <Script Name="Script:A" File="a.rhai" Table="A"/>
                 <SimpleScript Name="Script:B" File="b.rhai"/>
                 <Widget/>
               </NodeList>"#,
        )
        .unwrap();
        let entries = parse_descriptor(&root, Path::new("/data"));
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0].as_ref().unwrap(),
            &Descriptor::Script {
                name: "Script:A".to_string(),
                file: PathBuf::from("/data/a.rhai"),
                table: "A".to_string(),
            }
        );
        assert!(matches!(
            entries[1],
            Err(ExtensionError::MissingAttribute { attribute: "Table", .. })
        ));
        assert!(matches!(entries[2], Err(ExtensionError::UnknownElement(_))));

        let single = XmlElement::parse(&composite("Math:Wrap", "Math:Add")).unwrap();
        let entries = parse_descriptor(&single, Path::new("."));
        assert_eq!(entries[0].as_ref().unwrap().name(), "Math:Wrap");
    }

    #[test]
    fn composites_resolve_in_dependency_order() {
        let ctx = context();
        let mut report = ExtensionReport::default();
        resolve_composites(
            &ctx,
            vec![
                definition(&composite("C:Outer", "C:Inner")),
                definition(&composite("C:Inner", "Math:Add")),
            ],
            &mut report,
        );
        assert_eq!(report.loaded, vec!["C:Inner", "C:Outer"]);
        assert!(report.dropped.is_empty());
    }

    #[test]
    fn three_composite_cycle_is_dropped_once_each() {
        let ctx = context();
        let mut report = ExtensionReport::default();
        resolve_composites(
            &ctx,
            vec![
                definition(&composite("C:A", "C:B")),
                definition(&composite("C:B", "C:C")),
                definition(&composite("C:C", "C:A")),
                definition(&composite("C:Ok", "Math:Add")),
            ],
            &mut report,
        );
        assert_eq!(report.loaded, vec!["C:Ok"]);
        let mut dropped: Vec<&str> = report.dropped.iter().map(|(n, _)| n.as_str()).collect();
        dropped.sort();
        assert_eq!(dropped, vec!["C:A", "C:B", "C:C"]);
        assert!(report.dropped.iter().all(|(_, reason)| reason.contains("unresolvable")));
        assert!(!ctx.registry.borrow().contains("C:A"));
    }

    #[test]
    fn invalid_composites_are_dropped_without_retry() {
        let ctx = context();
        let mut report = ExtensionReport::default();
        let broken = r#"<Composite Name="C:Broken">
                          <Nodes><Node Id="n" Class="Math:Add"/></Nodes>
                          <Outputs><Port Name="Out" Node="n" Port="Nope"/></Outputs>
                        </Composite>"#;
        resolve_composites(&ctx, vec![definition(broken)], &mut report);
        assert_eq!(report.dropped.len(), 1);
        assert!(!report.dropped[0].1.contains("unresolvable"));
    }

    #[test]
    fn directory_loading_registers_scripts_and_composites() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("counter.rhai"),
            r#"let Counter = #{ Inputs: ["Add"], Outputs: ["Count"] };"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("a.node"),
            format!(
                r#"<NodeList>
                     <Script Name="Script:Counter" File="counter.rhai" Table="Counter"/>
                     <Script Name="Script:Ghost" File="ghost.rhai" Table="Ghost"/>
                     {}
                   </NodeList>"#,
                composite("C:Wrap", "Math:Add")
            ),
        )
        .unwrap();
        fs::write(dir.path().join("b.node"), "<NodeList><Script").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let ctx = context();
        let mut blacklist = Blacklist::default();
        blacklist.veto("C:Wrap");
        ctx.registry.borrow_mut().set_blacklist(blacklist);
        let report = load_extensions(&ctx, dir.path());

        assert_eq!(report.loaded, vec!["Script:Counter"]);
        assert_eq!(report.vetoed, vec!["C:Wrap"]);
        assert_eq!(report.dropped.len(), 2);
        assert!(ctx.registry.borrow().contains("Script:Counter"));
    }
}
