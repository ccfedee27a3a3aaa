//! Scene graph produced by the decoders.
//!
//! A decoded asset is a tree of [`SceneNode`] trait objects. Each node owns a
//! local [`Instance`] and its children. Nodes that carry renderable data expose
//! it through the [`HasGeometry`] and [`HasMaterial`] capabilities, which is
//! all the normalizer and the disposal manager need to know about them.

use cgmath::{Matrix4, Point3, SquareMatrix, Transform};

use crate::{
    data_structures::{
        bounds::Bounds, geometry::Geometry, instance::Instance, material::Material,
    },
    resources::animation::Keyframes,
};

/// An animation clip: a named animation with keyframes and timing.
#[derive(Clone, Debug)]
pub struct AnimationClip {
    pub name: String,
    pub keyframes: Keyframes,
    pub timestamps: Vec<f32>,
}

#[derive(Clone, Debug, Default)]
pub struct ModelAnimation {
    pub name: String,
    pub instances: Vec<Instance>,
    pub timestamps: Vec<f32>,
}

/**
 * Intermediate state when converting between `AnimationClip` and `ModelAnimation`
 */
#[derive(Default)]
struct ModelState {
    animations: Vec<ModelAnimation>,
    trans: Vec<cgmath::Vector3<f32>>,
    rots: Vec<cgmath::Quaternion<f32>>,
    scals: Vec<cgmath::Vector3<f32>>,
    timestamps: Vec<f32>,
    current_clip: String,
}

impl ModelState {
    fn reset(&mut self, clip: &AnimationClip) {
        self.timestamps = vec![];
        self.trans = vec![];
        self.rots = vec![];
        self.scals = vec![];
        self.current_clip = clip.name.clone();
    }

    fn save_current_anim(&mut self) -> ModelAnimation {
        let max_len = self.trans.len().max(self.rots.len()).max(self.scals.len());
        if self.trans.len() != max_len || self.rots.len() != max_len || self.scals.len() != max_len
        {
            log::warn!(
                "Animation tracks of clip {} differ in length, padding with their first frame",
                self.current_clip
            );
        }
        // Missing tracks fall back to their first frame (child nodes carry offsets)
        let first_or = |i: usize, len: usize| if i < len { i } else { 0 };
        let instances = (0..max_len)
            .map(|i| Instance {
                position: self
                    .trans
                    .get(first_or(i, self.trans.len()))
                    .copied()
                    .unwrap_or(cgmath::Vector3::new(0.0, 0.0, 0.0)),
                rotation: self
                    .rots
                    .get(first_or(i, self.rots.len()))
                    .copied()
                    .unwrap_or(Instance::new().rotation),
                scale: self
                    .scals
                    .get(first_or(i, self.scals.len()))
                    .copied()
                    .unwrap_or(cgmath::Vector3::new(1.0, 1.0, 1.0)),
            })
            .collect();
        ModelAnimation {
            name: self.current_clip.clone(),
            instances,
            timestamps: self.timestamps.clone(),
        }
    }
}

/**
 * Merges keyframes with the same name to have all transformations in one place.
 *
 * glTF stores one channel per property:
 * AnimationClip { name: anim1, keyframes: Scale([..]) }
 * AnimationClip { name: anim1, keyframes: Rotation([..]) }
 *
 * which becomes
 *
 * ModelAnimation { name: anim1, instances: [..] }
 */
pub fn merge(clips: &[AnimationClip]) -> Vec<ModelAnimation> {
    let Some(first) = clips.first() else {
        return Vec::new();
    };
    let mut state = ModelState {
        current_clip: first.name.clone(),
        ..Default::default()
    };
    for clip in clips {
        if clip.name != state.current_clip {
            let animation = state.save_current_anim();
            state.animations.push(animation);
            state.reset(clip);
        }
        match &clip.keyframes {
            Keyframes::Translation(translations) => state.trans.extend(translations),
            Keyframes::Rotation(rotations) => state.rots.extend(rotations),
            Keyframes::Scale(scales) => state.scals.extend(scales),
            Keyframes::Other => continue,
        }
        // Keep the largest set of timestamps when tracks have fewer steps than others
        if clip.timestamps.len() > state.timestamps.len() {
            state.timestamps = clip.timestamps.clone();
        }
    }
    let animation = state.save_current_anim();
    state.animations.push(animation);
    state.animations
}

/// Capability of nodes that own vertex data.
pub trait HasGeometry {
    fn geometry(&self) -> &Geometry;
    fn geometry_mut(&mut self) -> &mut Geometry;
}

/// Capability of nodes that own a material.
pub trait HasMaterial {
    fn material(&self) -> &Material;
    fn material_mut(&mut self) -> &mut Material;
}

pub trait SceneNode: Send + Sync {
    fn name(&self) -> &str;

    fn get_local_transform(&self) -> Instance;

    fn set_local_transform(&mut self, instance: Instance);

    fn get_children(&self) -> &Vec<Box<dyn SceneNode>>;

    fn get_children_mut(&mut self) -> &mut Vec<Box<dyn SceneNode>>;

    fn add_child(&mut self, child: Box<dyn SceneNode>);

    fn get_animation(&self) -> &Vec<ModelAnimation>;

    fn as_geometry(&self) -> Option<&dyn HasGeometry> {
        None
    }

    fn as_geometry_mut(&mut self) -> Option<&mut dyn HasGeometry> {
        None
    }

    fn as_material(&self) -> Option<&dyn HasMaterial> {
        None
    }

    fn as_material_mut(&mut self) -> Option<&mut dyn HasMaterial> {
        None
    }
}

/// Visits `node` and all of its descendants, parents first.
pub fn visit(node: &dyn SceneNode, f: &mut dyn FnMut(&dyn SceneNode)) {
    f(node);
    for child in node.get_children() {
        visit(child.as_ref(), f);
    }
}

pub fn visit_mut(node: &mut dyn SceneNode, f: &mut dyn FnMut(&mut dyn SceneNode)) {
    f(node);
    for child in node.get_children_mut() {
        visit_mut(child.as_mut(), f);
    }
}

/// Axis-aligned bounds of every geometry below `node`, in the space `node`'s
/// parent lives in (the root's own transform is applied).
pub fn world_bounds(node: &dyn SceneNode) -> Bounds {
    let mut bounds = Bounds::new();
    accumulate_bounds(node, &Matrix4::identity(), &mut bounds);
    bounds
}

fn accumulate_bounds(node: &dyn SceneNode, parent: &Matrix4<f32>, bounds: &mut Bounds) {
    let world = parent * node.get_local_transform().to_matrix();
    if let Some(geometry) = node.as_geometry() {
        for p in &geometry.geometry().positions {
            let w = world.transform_point(Point3::new(p[0], p[1], p[2]));
            bounds.update(f64::from(w.x), f64::from(w.y), f64::from(w.z));
        }
    }
    for child in node.get_children() {
        accumulate_bounds(child.as_ref(), &world, bounds);
    }
}

/// Grouping node without own geometry.
pub struct ContainerNode {
    pub name: String,
    pub children: Vec<Box<dyn SceneNode>>,
    pub instance: Instance,
    animations: Vec<ModelAnimation>,
}

impl ContainerNode {
    pub fn new(name: &str, animations: Vec<ModelAnimation>) -> Self {
        Self {
            name: name.to_string(),
            children: vec![],
            instance: Instance::default(),
            animations,
        }
    }

    pub fn with_transform(mut self, instance: Instance) -> Self {
        self.instance = instance;
        self
    }
}

impl SceneNode for ContainerNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_local_transform(&self) -> Instance {
        self.instance
    }

    fn set_local_transform(&mut self, instance: Instance) {
        self.instance = instance;
    }

    fn get_children(&self) -> &Vec<Box<dyn SceneNode>> {
        &self.children
    }

    fn get_children_mut(&mut self) -> &mut Vec<Box<dyn SceneNode>> {
        &mut self.children
    }

    fn add_child(&mut self, child: Box<dyn SceneNode>) {
        self.children.push(child);
    }

    fn get_animation(&self) -> &Vec<ModelAnimation> {
        &self.animations
    }
}

/// Triangle mesh with one material.
pub struct MeshNode {
    pub name: String,
    pub geometry: Geometry,
    pub material: Material,
    pub instance: Instance,
    children: Vec<Box<dyn SceneNode>>,
    animations: Vec<ModelAnimation>,
}

impl MeshNode {
    pub fn new(name: &str, geometry: Geometry, material: Material) -> Self {
        Self {
            name: name.to_string(),
            geometry,
            material,
            instance: Instance::default(),
            children: vec![],
            animations: vec![],
        }
    }

    pub fn with_animations(mut self, animations: Vec<ModelAnimation>) -> Self {
        self.animations = animations;
        self
    }
}

impl HasGeometry for MeshNode {
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn geometry_mut(&mut self) -> &mut Geometry {
        &mut self.geometry
    }
}

impl HasMaterial for MeshNode {
    fn material(&self) -> &Material {
        &self.material
    }

    fn material_mut(&mut self) -> &mut Material {
        &mut self.material
    }
}

impl SceneNode for MeshNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_local_transform(&self) -> Instance {
        self.instance
    }

    fn set_local_transform(&mut self, instance: Instance) {
        self.instance = instance;
    }

    fn get_children(&self) -> &Vec<Box<dyn SceneNode>> {
        &self.children
    }

    fn get_children_mut(&mut self) -> &mut Vec<Box<dyn SceneNode>> {
        &mut self.children
    }

    fn add_child(&mut self, child: Box<dyn SceneNode>) {
        self.children.push(child);
    }

    fn get_animation(&self) -> &Vec<ModelAnimation> {
        &self.animations
    }

    fn as_geometry(&self) -> Option<&dyn HasGeometry> {
        Some(self)
    }

    fn as_geometry_mut(&mut self) -> Option<&mut dyn HasGeometry> {
        Some(self)
    }

    fn as_material(&self) -> Option<&dyn HasMaterial> {
        Some(self)
    }

    fn as_material_mut(&mut self) -> Option<&mut dyn HasMaterial> {
        Some(self)
    }
}

/// Unconnected points rendered with a point material.
pub struct PointsNode {
    pub name: String,
    pub geometry: Geometry,
    pub material: Material,
    pub instance: Instance,
    children: Vec<Box<dyn SceneNode>>,
    animations: Vec<ModelAnimation>,
}

impl PointsNode {
    pub fn new(name: &str, geometry: Geometry, material: Material) -> Self {
        Self {
            name: name.to_string(),
            geometry,
            material,
            instance: Instance::default(),
            children: vec![],
            animations: vec![],
        }
    }

    pub fn point_count(&self) -> usize {
        self.geometry.vertex_count()
    }
}

impl HasGeometry for PointsNode {
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn geometry_mut(&mut self) -> &mut Geometry {
        &mut self.geometry
    }
}

impl HasMaterial for PointsNode {
    fn material(&self) -> &Material {
        &self.material
    }

    fn material_mut(&mut self) -> &mut Material {
        &mut self.material
    }
}

impl SceneNode for PointsNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_local_transform(&self) -> Instance {
        self.instance
    }

    fn set_local_transform(&mut self, instance: Instance) {
        self.instance = instance;
    }

    fn get_children(&self) -> &Vec<Box<dyn SceneNode>> {
        &self.children
    }

    fn get_children_mut(&mut self) -> &mut Vec<Box<dyn SceneNode>> {
        &mut self.children
    }

    fn add_child(&mut self, child: Box<dyn SceneNode>) {
        self.children.push(child);
    }

    fn get_animation(&self) -> &Vec<ModelAnimation> {
        &self.animations
    }

    fn as_geometry(&self) -> Option<&dyn HasGeometry> {
        Some(self)
    }

    fn as_geometry_mut(&mut self) -> Option<&mut dyn HasGeometry> {
        Some(self)
    }

    fn as_material(&self) -> Option<&dyn HasMaterial> {
        Some(self)
    }

    fn as_material_mut(&mut self) -> Option<&mut dyn HasMaterial> {
        Some(self)
    }
}
