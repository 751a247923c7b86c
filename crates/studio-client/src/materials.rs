use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialKind {
    Character,
    Scene,
    Prop,
}

impl MaterialKind {
    pub const ALL: [MaterialKind; 3] = [
        MaterialKind::Character,
        MaterialKind::Scene,
        MaterialKind::Prop,
    ];

    /// Path segment under `/materials/`.
    pub const fn api_path(self) -> &'static str {
        match self {
            MaterialKind::Character => "characters",
            MaterialKind::Scene => "scenes",
            MaterialKind::Prop => "props",
        }
    }

    /// Form field carrying the selected names as a JSON array.
    pub const fn form_field(self) -> &'static str {
        match self {
            MaterialKind::Character => "character_materials",
            MaterialKind::Scene => "scene_materials",
            MaterialKind::Prop => "prop_materials",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            MaterialKind::Character => "人物",
            MaterialKind::Scene => "场景",
            MaterialKind::Prop => "道具",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRef {
    pub id: String,
    pub name: String,
}

impl MaterialRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Materials picked for one tool form, grouped by kind, in pick order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterialSelectionSession {
    characters: Vec<MaterialRef>,
    scenes: Vec<MaterialRef>,
    props: Vec<MaterialRef>,
}

impl MaterialSelectionSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, kind: MaterialKind) -> &Vec<MaterialRef> {
        match kind {
            MaterialKind::Character => &self.characters,
            MaterialKind::Scene => &self.scenes,
            MaterialKind::Prop => &self.props,
        }
    }

    fn list_mut(&mut self, kind: MaterialKind) -> &mut Vec<MaterialRef> {
        match kind {
            MaterialKind::Character => &mut self.characters,
            MaterialKind::Scene => &mut self.scenes,
            MaterialKind::Prop => &mut self.props,
        }
    }

    /// Returns false when a material with the same id is already selected.
    pub fn add(&mut self, kind: MaterialKind, material: MaterialRef) -> bool {
        let list = self.list_mut(kind);
        if list.iter().any(|m| m.id == material.id) {
            return false;
        }
        list.push(material);
        true
    }

    pub fn remove(&mut self, kind: MaterialKind, id: &str) -> bool {
        let list = self.list_mut(kind);
        let before = list.len();
        list.retain(|m| m.id != id);
        list.len() != before
    }

    pub fn clear(&mut self) {
        self.characters.clear();
        self.scenes.clear();
        self.props.clear();
    }

    pub fn selected(&self, kind: MaterialKind) -> &[MaterialRef] {
        self.list(kind)
    }

    pub fn names(&self, kind: MaterialKind) -> Vec<String> {
        self.list(kind).iter().map(|m| m.name.clone()).collect()
    }

    /// All names, characters first, then scenes, then props.
    pub fn all_names(&self) -> Vec<String> {
        MaterialKind::ALL
            .into_iter()
            .flat_map(|kind| self.names(kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.characters.len() + self.scenes.len() + self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The three per-kind JSON fields of the storyboard generation form.
    pub fn storyboard_fields(&self) -> Vec<(&'static str, String)> {
        MaterialKind::ALL
            .into_iter()
            .map(|kind| (kind.form_field(), names_json(&self.names(kind))))
            .collect()
    }

    /// `related_materials` field of the shot prompt form.
    pub fn related_materials_field(&self) -> (&'static str, String) {
        ("related_materials", names_json(&self.all_names()))
    }
}

fn names_json(names: &[String]) -> String {
    serde_json::to_string(names).unwrap_or_else(|_| "[]".to_string())
}
