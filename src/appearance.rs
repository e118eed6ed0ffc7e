//! Appearance options: materials, colors and optional meshes.
//!
//! The scene itself lives behind [`SceneBackend`]; this module decides which
//! calls to make and wraps every user-visible change in an undoable
//! [`Command`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::history::{Command, UndoStack};
use crate::model::PartDefinition;

/// Material channel changed by an alter-material section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialParameter {
    Color,
    Texture,
}

/// What clicking an option of a section does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "interaction_type", rename_all = "snake_case")]
pub enum InteractionType {
    /// Replace the clicked mesh's material.
    SwapMaterial,
    /// Change one channel of the clicked mesh's material.
    AlterMaterial { parameter: MaterialParameter },
    /// Show the option's mesh and hide the alternatives.
    ToggleMesh,
}

/// Moves a mesh when an option is shown.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub mesh: String,
    pub position: DVec3,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppearanceOption {
    pub name: String,
    /// Mesh name, material name or property value, depending on the section.
    pub value: String,
    /// Mesh shown together with this option.
    #[serde(default)]
    pub include: Option<String>,
    /// Meshes hidden while this option is shown.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub adjustments: Vec<Adjustment>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptionGroup {
    #[serde(default)]
    pub allow_none: bool,
    #[serde(default)]
    pub default_selected: Option<usize>,
    pub options: Vec<AppearanceOption>,
}

impl OptionGroup {
    /// Option selected before the user touches the group.
    pub fn initial_selection(&self) -> Option<usize> {
        match self.default_selected {
            Some(index) if index < self.options.len() => Some(index),
            Some(_) => None,
            None if !self.allow_none && !self.options.is_empty() => Some(0),
            None => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppearanceSection {
    pub name: String,
    #[serde(flatten)]
    pub interaction: InteractionType,
    pub option_groups: Vec<OptionGroup>,
}

/// Operations the scene collaborator provides.
pub trait SceneBackend {
    fn material_property(&self, mesh: &str, parameter: MaterialParameter) -> Option<String>;
    /// `None` resets the channel.
    fn set_material_property(&mut self, mesh: &str, parameter: MaterialParameter, value: Option<&str>);
    fn material(&self, mesh: &str) -> Option<String>;
    /// `None` removes the material.
    fn set_material(&mut self, mesh: &str, material: Option<&str>);
    fn set_mesh_visible(&mut self, mesh: &str, visible: bool);
    fn set_position(&mut self, mesh: &str, position: DVec3);
}

/// Something carrying string attributes, such as a UI element.
pub trait AttributeTarget {
    fn attribute(&self, key: &str) -> Option<String>;
    fn set_attribute(&mut self, key: &str, value: &str);
    fn remove_attribute(&mut self, key: &str);
}

/// Sets one material channel; undo restores the value found now.
pub fn set_material_property<T>(
    scene: &T,
    mesh: &str,
    parameter: MaterialParameter,
    value: &str,
) -> Command<T>
where
    T: SceneBackend + ?Sized + 'static,
{
    let previous = scene.material_property(mesh, parameter);
    let (undo_mesh, redo_mesh) = (mesh.to_string(), mesh.to_string());
    let value = value.to_string();
    Command::new(
        format!("set {:?} of {}", parameter, mesh),
        move |s: &mut T| s.set_material_property(&undo_mesh, parameter, previous.as_deref()),
        move |s: &mut T| s.set_material_property(&redo_mesh, parameter, Some(&value)),
    )
}

/// Replaces a mesh's material; undo restores the material found now.
pub fn swap_material<T>(scene: &T, mesh: &str, material: &str) -> Command<T>
where
    T: SceneBackend + ?Sized + 'static,
{
    let previous = scene.material(mesh);
    let (undo_mesh, redo_mesh) = (mesh.to_string(), mesh.to_string());
    let material = material.to_string();
    Command::new(
        format!("swap material of {}", mesh),
        move |s: &mut T| s.set_material(&undo_mesh, previous.as_deref()),
        move |s: &mut T| s.set_material(&redo_mesh, Some(&material)),
    )
}

/// Sets attributes on a target; a `None` value removes the attribute.
///
/// Without `previous`, the values to restore are read from `target` now.
pub fn set_attributes<T>(
    target: &T,
    attributes: BTreeMap<String, Option<String>>,
    previous: Option<BTreeMap<String, Option<String>>>,
) -> Command<T>
where
    T: AttributeTarget + ?Sized + 'static,
{
    let previous = previous.unwrap_or_else(|| {
        attributes
            .keys()
            .map(|key| (key.clone(), target.attribute(key)))
            .collect()
    });
    Command::new(
        "set attributes",
        move |t: &mut T| apply_attributes(t, &previous),
        move |t: &mut T| apply_attributes(t, &attributes),
    )
}

fn apply_attributes<T: AttributeTarget + ?Sized>(
    target: &mut T,
    attributes: &BTreeMap<String, Option<String>>,
) {
    for (key, value) in attributes {
        match value {
            Some(value) => target.set_attribute(key, value),
            None => target.remove_attribute(key),
        }
    }
}

/// Whether a mesh node belongs to a styled-part pattern.
///
/// Both names are split at dots and compared from the end, so the pattern
/// `"door.handle"` matches `"cabinet.door.handle"` but not `"cabinet.handle"`.
pub fn matches_styled_part(node_name: &str, pattern: &str) -> bool {
    let mut node = node_name.rsplit('.');
    pattern
        .rsplit('.')
        .all(|piece| node.next() == Some(piece))
}

/// The node names among `nodes` that receive color changes for `definition`.
pub fn styled_nodes<'a>(
    definition: &PartDefinition,
    nodes: impl IntoIterator<Item = &'a str>,
) -> Vec<&'a str> {
    nodes
        .into_iter()
        .filter(|node| {
            definition
                .parts_styled
                .iter()
                .any(|pattern| matches_styled_part(node, pattern))
        })
        .collect()
}

/// Recolors every styled node of a part as one undoable step.
pub fn recolor_styled_parts<'a, T>(
    scene: &T,
    definition: &PartDefinition,
    nodes: impl IntoIterator<Item = &'a str>,
    color: &str,
) -> Command<T>
where
    T: SceneBackend + ?Sized + 'static,
{
    let mut undo_steps = Vec::new();
    let mut redo_steps = Vec::new();
    for node in styled_nodes(definition, nodes) {
        let (undo, redo) = set_material_property(scene, node, MaterialParameter::Color, color).into_actions();
        undo_steps.push(undo);
        redo_steps.push(redo);
    }
    Command::new(
        format!("recolor {} to {}", definition.name, color),
        move |s: &mut T| {
            for undo in undo_steps.iter_mut().rev() {
                undo(s);
            }
        },
        move |s: &mut T| {
            for redo in redo_steps.iter_mut() {
                redo(s);
            }
        },
    )
}

/// Scene plus the option selection it reflects.
#[derive(Debug)]
pub struct AppearanceState<B> {
    pub scene: B,
    /// Selected option per (section, group).
    chosen: HashMap<(usize, usize), Option<usize>>,
    /// Last (group, option) picked per section, applied when a mesh is clicked.
    last_clicked: HashMap<usize, Option<(usize, usize)>>,
}

impl<B: SceneBackend> SceneBackend for AppearanceState<B> {
    fn material_property(&self, mesh: &str, parameter: MaterialParameter) -> Option<String> {
        self.scene.material_property(mesh, parameter)
    }

    fn set_material_property(&mut self, mesh: &str, parameter: MaterialParameter, value: Option<&str>) {
        self.scene.set_material_property(mesh, parameter, value)
    }

    fn material(&self, mesh: &str) -> Option<String> {
        self.scene.material(mesh)
    }

    fn set_material(&mut self, mesh: &str, material: Option<&str>) {
        self.scene.set_material(mesh, material)
    }

    fn set_mesh_visible(&mut self, mesh: &str, visible: bool) {
        self.scene.set_mesh_visible(mesh, visible)
    }

    fn set_position(&mut self, mesh: &str, position: DVec3) {
        self.scene.set_position(mesh, position)
    }
}

impl<B: SceneBackend> AppearanceState<B> {
    pub fn selected(&self, section: usize, group: usize) -> Option<usize> {
        self.chosen.get(&(section, group)).copied().flatten()
    }

    pub fn last_clicked(&self, section: usize) -> Option<(usize, usize)> {
        self.last_clicked.get(&section).copied().flatten()
    }

    fn option_on(&mut self, sections: &[AppearanceSection], section: usize, group: usize, option: usize) {
        let Some(sec) = sections.get(section) else {
            return;
        };
        if sec.interaction != InteractionType::ToggleMesh {
            return;
        }
        let Some(opt) = sec.option_groups.get(group).and_then(|g| g.options.get(option)) else {
            return;
        };
        self.scene.set_mesh_visible(&opt.value, true);
        if let Some(include) = &opt.include {
            self.scene.set_mesh_visible(include, true);
        }
        for mesh in &opt.exclude {
            self.scene.set_mesh_visible(mesh, false);
        }
        for adjustment in &opt.adjustments {
            self.scene.set_position(&adjustment.mesh, adjustment.position);
        }
        // Other selected options may position the mesh just shown.
        for (g, other_group) in sec.option_groups.iter().enumerate() {
            let Some(selected) = self.selected(section, g).and_then(|i| other_group.options.get(i)) else {
                continue;
            };
            for adjustment in selected.adjustments.iter().filter(|a| a.mesh == opt.value) {
                self.scene.set_position(&adjustment.mesh, adjustment.position);
            }
        }
    }

    fn option_off(&mut self, sections: &[AppearanceSection], section: usize, group: usize, option: usize) {
        let Some(sec) = sections.get(section) else {
            return;
        };
        if sec.interaction != InteractionType::ToggleMesh {
            return;
        }
        let Some(opt) = sec.option_groups.get(group).and_then(|g| g.options.get(option)) else {
            return;
        };
        self.scene.set_mesh_visible(&opt.value, false);
        if let Some(include) = &opt.include {
            let shared = sec.option_groups.iter().enumerate().any(|(g, other_group)| {
                self.selected(section, g)
                    .and_then(|i| other_group.options.get(i))
                    .is_some_and(|other| other.name != opt.name && other.include.as_ref() == Some(include))
            });
            if !shared {
                self.scene.set_mesh_visible(include, false);
            }
        }
        for mesh in &opt.exclude {
            self.scene.set_mesh_visible(mesh, true);
        }
    }
}

/// Drives option selection and mesh clicks for one product.
pub struct AppearanceEditor<B: SceneBackend + 'static> {
    sections: Arc<Vec<AppearanceSection>>,
    blacklist: Vec<String>,
    active_section: usize,
    state: AppearanceState<B>,
    history: UndoStack<AppearanceState<B>>,
}

impl<B: SceneBackend + 'static> AppearanceEditor<B> {
    /// Creates an editor with every group at its initial selection.
    pub fn new(scene: B, sections: Vec<AppearanceSection>, history_limit: usize) -> Self {
        let mut chosen = HashMap::new();
        for (s, section) in sections.iter().enumerate() {
            for (g, group) in section.option_groups.iter().enumerate() {
                chosen.insert((s, g), group.initial_selection());
            }
        }
        Self {
            sections: Arc::new(sections),
            blacklist: Vec::new(),
            active_section: 0,
            state: AppearanceState {
                scene,
                chosen,
                last_clicked: HashMap::new(),
            },
            history: UndoStack::with_limit(history_limit),
        }
    }

    /// Meshes that ignore clicks.
    pub fn with_blacklist<I, S>(mut self, meshes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blacklist.extend(meshes.into_iter().map(Into::into));
        self
    }

    pub fn state(&self) -> &AppearanceState<B> {
        &self.state
    }

    pub fn scene(&self) -> &B {
        &self.state.scene
    }

    pub fn history(&self) -> &UndoStack<AppearanceState<B>> {
        &self.history
    }

    pub fn active_section(&self) -> usize {
        self.active_section
    }

    pub fn set_active_section(&mut self, section: usize) {
        if section < self.sections.len() {
            self.active_section = section;
        }
    }

    /// Handles a click on an option of the active section.
    ///
    /// Toggle-mesh changes are undoable; for material sections the click
    /// only arms the option for the next mesh click.
    pub fn option_clicked(&mut self, group: usize, option: usize) {
        let section = self.active_section;
        let Some(sec) = self.sections.get(section) else {
            return;
        };
        let Some(grp) = sec.option_groups.get(group) else {
            return;
        };
        if option >= grp.options.len() {
            return;
        }
        let toggles = sec.interaction == InteractionType::ToggleMesh;
        let allow_none = grp.allow_none;
        let current = self.state.selected(section, group);
        let previous_click = self.state.last_clicked(section);
        let sections = Arc::clone(&self.sections);

        if current == Some(option) {
            if !allow_none {
                return;
            }
            let redo_sections = Arc::clone(&sections);
            let redo = move |s: &mut AppearanceState<B>| {
                s.option_off(&redo_sections, section, group, option);
                s.chosen.insert((section, group), None);
                s.last_clicked.insert(section, None);
            };
            let undo = move |s: &mut AppearanceState<B>| {
                s.option_on(&sections, section, group, option);
                s.chosen.insert((section, group), current);
                s.last_clicked.insert(section, previous_click);
            };
            self.apply(toggles, "deselect option", undo, redo);
        } else {
            let redo_sections = Arc::clone(&sections);
            let redo = move |s: &mut AppearanceState<B>| {
                if let Some(old) = current {
                    s.option_off(&redo_sections, section, group, old);
                }
                s.chosen.insert((section, group), Some(option));
                s.option_on(&redo_sections, section, group, option);
                s.last_clicked.insert(section, Some((group, option)));
            };
            let undo = move |s: &mut AppearanceState<B>| {
                s.option_off(&sections, section, group, option);
                s.chosen.insert((section, group), current);
                if let Some(old) = current {
                    s.option_on(&sections, section, group, old);
                }
                s.last_clicked.insert(section, previous_click);
            };
            self.apply(toggles, "select option", undo, redo);
        }
    }

    fn apply(
        &mut self,
        undoable: bool,
        label: &str,
        undo: impl FnMut(&mut AppearanceState<B>) + 'static,
        mut redo: impl FnMut(&mut AppearanceState<B>) + 'static,
    ) {
        if undoable {
            self.history.add(&mut self.state, Command::new(label, undo, redo));
        } else {
            redo(&mut self.state);
        }
    }

    /// Applies the armed option of the active section to a clicked mesh.
    pub fn mesh_clicked(&mut self, mesh: &str) {
        if self.blacklist.iter().any(|m| m == mesh) {
            debug!("Ignoring click on blacklisted mesh {}", mesh);
            return;
        }
        let section = self.active_section;
        let Some(sec) = self.sections.get(section) else {
            return;
        };
        let Some(value) = self
            .state
            .last_clicked(section)
            .and_then(|(group, option)| sec.option_groups.get(group)?.options.get(option))
            .map(|o| o.value.clone())
        else {
            return;
        };

        let command = match sec.interaction {
            InteractionType::AlterMaterial { parameter } => {
                set_material_property(&self.state, mesh, parameter, &value)
            }
            InteractionType::SwapMaterial => swap_material(&self.state, mesh, &value),
            InteractionType::ToggleMesh => return,
        };
        self.history.add(&mut self.state, command);
    }

    pub fn undo(&mut self) -> bool {
        self.history.undo(&mut self.state)
    }

    pub fn redo(&mut self) -> bool {
        self.history.redo(&mut self.state)
    }
}
