use super::object::{NetObject, SyncMode, UNASSIGNED_NETWORK_ID};
use super::registry::ObjectRegistry;
use super::snapshot::{CommandAck, ObjectTree, Snapshot};
use super::ReplicationError;

const FIRST_NETWORK_ID: i32 = 1;

/// The replicated object hierarchy of one scene instance.
///
/// An authoritative scene hands out network ids; a client scene takes its ids
/// from incoming snapshots.
#[derive(Debug)]
pub struct Scene {
    name: String,
    epoch: u32,
    authority: bool,
    objects: Vec<NetObject>,
    next_network_id: i32,
}

impl Scene {
    pub fn new(name: impl Into<String>, authority: bool) -> Self {
        Self {
            name: name.into(),
            epoch: 0,
            authority,
            objects: Vec::new(),
            next_network_id: FIRST_NETWORK_ID,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn is_authority(&self) -> bool {
        self.authority
    }

    pub fn objects(&self) -> &[NetObject] {
        &self.objects
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of nodes in the whole tree, local ones included.
    pub fn node_count(&self) -> usize {
        self.objects.iter().map(NetObject::count_nodes).sum()
    }

    /// Drops every object and starts instance `epoch` of scene `name`.
    /// Network ids keep counting from where they were.
    pub fn reset(&mut self, name: impl Into<String>, epoch: u32) {
        self.name = name.into();
        self.epoch = epoch;
        self.objects.clear();
    }

    /// Starts the next scene instance and returns its epoch.
    pub fn advance_epoch(&mut self, name: impl Into<String>) -> u32 {
        let epoch = self.epoch.wrapping_add(1);
        self.reset(name, epoch);
        epoch
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Adds a top-level object. On the authority every replicating node of
    /// the subtree gets a fresh network id; the root's id is returned.
    pub fn add(&mut self, mut object: NetObject) -> i32 {
        self.register(&mut object);
        let network_id = object.network_id();
        self.objects.push(object);
        network_id
    }

    /// Adds `object` under the node `parent`. Returns `None`, dropping the
    /// object, when the parent does not exist.
    pub fn add_child(&mut self, parent: i32, mut object: NetObject) -> Option<i32> {
        if self.find(parent).is_none() {
            log::debug!("Cannot attach object: parent {} not found", parent);
            return None;
        }

        self.register(&mut object);
        let network_id = object.network_id();
        self.find_mut(parent)?.children_mut().push(object);
        Some(network_id)
    }

    fn register(&mut self, object: &mut NetObject) {
        if self.authority {
            object.assign_network_ids(&mut self.next_network_id);
        }
    }

    /// Removes the node with `network_id` together with its subtree.
    pub fn remove(&mut self, network_id: i32) -> Option<NetObject> {
        if network_id == UNASSIGNED_NETWORK_ID {
            return None;
        }
        if let Some(index) = self
            .objects
            .iter()
            .position(|object| object.network_id() == network_id)
        {
            return Some(self.objects.remove(index));
        }
        self.objects
            .iter_mut()
            .find_map(|object| object.remove_descendant(network_id))
    }

    pub fn find(&self, network_id: i32) -> Option<&NetObject> {
        if network_id == UNASSIGNED_NETWORK_ID {
            return None;
        }
        self.objects.iter().find_map(|object| object.find(network_id))
    }

    pub fn find_mut(&mut self, network_id: i32) -> Option<&mut NetObject> {
        if network_id == UNASSIGNED_NETWORK_ID {
            return None;
        }
        self.objects
            .iter_mut()
            .find_map(|object| object.find_mut(network_id))
    }

    /// The first pawn owned by `client_id`, in tree order.
    pub fn find_pawn(&self, client_id: i32) -> Option<&NetObject> {
        self.objects
            .iter()
            .find_map(|object| object.find_pawn(client_id))
    }

    pub fn find_pawn_mut(&mut self, client_id: i32) -> Option<&mut NetObject> {
        self.objects
            .iter_mut()
            .find_map(|object| object.find_pawn_mut(client_id))
    }

    /// Network ids of every node owned by `client_id`.
    pub fn owned_by(&self, client_id: i32) -> Vec<i32> {
        let mut owned = Vec::new();
        for object in &self.objects {
            object.collect_owned(client_id, &mut owned);
        }
        owned
    }

    /// Removes every node owned by `client_id`. Returns how many owned
    /// subtrees were removed.
    pub fn remove_owned_by(&mut self, client_id: i32) -> usize {
        self.owned_by(client_id)
            .into_iter()
            .filter(|&network_id| self.remove(network_id).is_some())
            .count()
    }

    pub fn update_dirty(&mut self) -> usize {
        self.objects
            .iter_mut()
            .map(NetObject::update_dirty_recursive)
            .sum()
    }

    pub fn clear_dirty(&mut self) {
        for object in &mut self.objects {
            object.clear_dirty_recursive();
        }
    }

    pub fn simulate(&mut self, dt: f32) {
        for object in &mut self.objects {
            object.simulate(dt);
        }
    }

    /// Every replicating node with either all properties or the dirty ones.
    pub fn build_snapshot(&self, tick: u32, acks: Vec<CommandAck>, mode: SyncMode) -> Snapshot {
        let mut objects = Vec::new();
        for object in &self.objects {
            object.append_trees(mode, &mut objects);
        }
        Snapshot {
            tick,
            scene_epoch: self.epoch,
            acks,
            objects,
        }
    }

    /// Brings this scene in line with an authoritative snapshot.
    ///
    /// Nodes are matched by network id. Known nodes receive their blob, new
    /// ones are built through `registry`, and replicated nodes the snapshot no
    /// longer lists are removed. A node of an unregistered type is skipped
    /// together with its subtree. Returns the number of nodes applied.
    pub fn apply_snapshot(
        &mut self,
        snapshot: &Snapshot,
        registry: &ObjectRegistry,
    ) -> Result<usize, ReplicationError> {
        reconcile(&mut self.objects, &snapshot.objects, registry)
    }
}

fn reconcile(
    existing: &mut Vec<NetObject>,
    trees: &[ObjectTree],
    registry: &ObjectRegistry,
) -> Result<usize, ReplicationError> {
    existing.retain(|object| {
        object.network_id() == UNASSIGNED_NETWORK_ID
            || trees.iter().any(|tree| tree.network_id == object.network_id())
    });

    let mut applied = 0;
    for tree in trees {
        let position = existing
            .iter()
            .position(|object| object.network_id() == tree.network_id);

        let object = match position {
            Some(index) if existing[index].net_type() == tree.type_id => &mut existing[index],
            _ => {
                let mut object = match registry.create(tree.type_id) {
                    Ok(object) => object,
                    Err(err) => {
                        log::warn!(
                            "Skipping object {} and {} descendants: {}",
                            tree.network_id,
                            tree.node_count() - 1,
                            err
                        );
                        continue;
                    }
                };
                object.set_network_id(tree.network_id);
                let index = match position {
                    Some(index) => {
                        existing[index] = object;
                        index
                    }
                    None => {
                        existing.push(object);
                        existing.len() - 1
                    }
                };
                &mut existing[index]
            }
        };

        object.set_owner(tree.owner);
        object.apply_properties(&tree.blob)?;
        applied += 1;
        applied += reconcile(object.children_mut(), &tree.children, registry)?;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::player::{
        self, Pawn, Prop, PAWN_COLOR, PAWN_HEALTH, PAWN_NAME, PAWN_POSITION, PROP_TYPE_ID,
    };
    use crate::replication::PropertyValue;

    fn host_scene() -> Scene {
        let mut scene = Scene::new("meadow", true);
        let root = scene.add(NetObject::new(Prop::default()));
        scene.add_child(root, NetObject::new(Pawn::default()).with_owner(1));
        scene.add(NetObject::new(Pawn::default()).with_owner(2));
        scene
    }

    #[test]
    fn children_get_distinct_increasing_ids() {
        let mut scene = Scene::new("ids", true);
        let root = scene.add(NetObject::new(Prop::default()));
        let ids: Vec<i32> = (0..3)
            .map(|_| {
                scene
                    .add_child(root, NetObject::new(Prop::default()))
                    .unwrap()
            })
            .collect();

        assert!(ids.iter().all(|&id| id != UNASSIGNED_NETWORK_ID));
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(ids.iter().all(|&id| id > root));
    }

    #[test]
    fn ids_are_never_reused() {
        let mut scene = Scene::new("ids", true);
        let first = scene.add(NetObject::new(Prop::default()));
        assert!(scene.remove(first).is_some());
        let second = scene.add(NetObject::new(Prop::default()));
        assert_ne!(first, second);

        scene.advance_epoch("next");
        let third = scene.add(NetObject::new(Prop::default()));
        assert!(third > second);
    }

    #[test]
    fn client_scene_does_not_assign_ids() {
        let mut scene = Scene::new("remote", false);
        assert_eq!(
            scene.add(NetObject::new(Prop::default())),
            UNASSIGNED_NETWORK_ID
        );
    }

    #[test]
    fn add_child_to_missing_parent_fails() {
        let mut scene = Scene::new("ids", true);
        assert_eq!(scene.add_child(77, NetObject::new(Prop::default())), None);
    }

    #[test]
    fn pawn_lookup_and_owner_removal() {
        let mut scene = host_scene();
        assert!(scene.find_pawn(1).is_some());
        assert!(scene.find_pawn(3).is_none());
        assert_eq!(scene.owned_by(1).len(), 1);

        assert_eq!(scene.remove_owned_by(1), 1);
        assert!(scene.find_pawn(1).is_none());
        assert!(scene.find_pawn(2).is_some());
        assert_eq!(scene.node_count(), 2);
    }

    #[test]
    fn full_snapshot_builds_matching_client_tree() {
        let mut host = host_scene();
        let pawn_id = host.find_pawn(1).unwrap().network_id();
        host.find_pawn_mut(1)
            .unwrap()
            .set(PAWN_HEALTH, PropertyValue::Int(55))
            .unwrap();

        let registry = player::object_registry().unwrap();
        let mut client = Scene::new("meadow", false);
        let applied = client
            .apply_snapshot(&host.build_snapshot(1, Vec::new(), SyncMode::Full), &registry)
            .unwrap();

        assert_eq!(applied, 3);
        let pawn = client.find(pawn_id).unwrap();
        assert_eq!(pawn.owner(), 1);
        assert_eq!(pawn.get(PAWN_HEALTH), Some(PropertyValue::Int(55)));
        assert_eq!(client.update_dirty(), 0);
    }

    #[test]
    fn delta_snapshot_updates_only_dirty_fields() {
        let registry = player::object_registry().unwrap();
        let mut host = host_scene();
        let mut client = Scene::new("meadow", false);
        client
            .apply_snapshot(&host.build_snapshot(1, Vec::new(), SyncMode::Full), &registry)
            .unwrap();
        host.clear_dirty();

        let pawn_id = host.find_pawn(2).unwrap().network_id();
        host.find_mut(pawn_id)
            .unwrap()
            .set(PAWN_POSITION, PropertyValue::Vec2(Vec2::new(4.0, 1.0)))
            .unwrap();
        assert_eq!(host.update_dirty(), 1);

        client
            .find_mut(pawn_id)
            .unwrap()
            .set(PAWN_HEALTH, PropertyValue::Int(1))
            .unwrap();
        client
            .apply_snapshot(&host.build_snapshot(2, Vec::new(), SyncMode::Delta), &registry)
            .unwrap();

        let pawn = client.find(pawn_id).unwrap();
        assert_eq!(
            pawn.get(PAWN_POSITION),
            Some(PropertyValue::Vec2(Vec2::new(4.0, 1.0)))
        );
        assert_eq!(pawn.get(PAWN_HEALTH), Some(PropertyValue::Int(1)));
    }

    #[test]
    fn object_spawned_after_full_sync_arrives_complete() {
        let registry = player::object_registry().unwrap();
        let mut host = host_scene();
        let mut client = Scene::new("meadow", false);
        client
            .apply_snapshot(&host.build_snapshot(1, Vec::new(), SyncMode::Full), &registry)
            .unwrap();
        host.clear_dirty();

        let pawn_id = player::spawn_pawn(&mut host, 5);
        host.update_dirty();
        client
            .apply_snapshot(&host.build_snapshot(2, Vec::new(), SyncMode::Delta), &registry)
            .unwrap();
        host.clear_dirty();

        let expected = host.find(pawn_id).unwrap();
        let pawn = client.find(pawn_id).unwrap();
        assert_eq!(pawn.owner(), 5);
        assert_eq!(
            pawn.get(PAWN_NAME),
            Some(PropertyValue::Text("frog_5".to_string()))
        );
        assert_eq!(pawn.get(PAWN_POSITION), expected.get(PAWN_POSITION));
        assert_eq!(pawn.get(PAWN_COLOR), expected.get(PAWN_COLOR));

        host.update_dirty();
        let settled = host.build_snapshot(3, Vec::new(), SyncMode::Delta);
        assert!(settled.objects.iter().all(|tree| tree.blob == [0, 0]));
    }

    #[test]
    fn objects_missing_from_snapshot_are_removed() {
        let registry = player::object_registry().unwrap();
        let mut host = host_scene();
        let mut client = Scene::new("meadow", false);
        client
            .apply_snapshot(&host.build_snapshot(1, Vec::new(), SyncMode::Full), &registry)
            .unwrap();
        assert_eq!(client.node_count(), 3);

        host.remove_owned_by(2);
        client
            .apply_snapshot(&host.build_snapshot(2, Vec::new(), SyncMode::Delta), &registry)
            .unwrap();
        assert_eq!(client.node_count(), 2);
        assert!(client.find_pawn(2).is_none());
    }

    #[test]
    fn unknown_types_are_skipped_with_their_subtree() {
        let snapshot = Snapshot {
            tick: 1,
            scene_epoch: 0,
            acks: Vec::new(),
            objects: vec![
                ObjectTree {
                    type_id: 99,
                    network_id: 10,
                    owner: -1,
                    blob: vec![0, 0],
                    children: vec![ObjectTree {
                        type_id: PROP_TYPE_ID,
                        network_id: 11,
                        owner: -1,
                        blob: vec![0, 0],
                        children: Vec::new(),
                    }],
                },
                ObjectTree {
                    type_id: PROP_TYPE_ID,
                    network_id: 12,
                    owner: -1,
                    blob: vec![0, 0],
                    children: Vec::new(),
                },
            ],
        };

        let mut client = Scene::new("remote", false);
        let applied = client
            .apply_snapshot(&snapshot, &player::object_registry().unwrap())
            .unwrap();
        assert_eq!(applied, 1);
        assert!(client.find(11).is_none());
        assert!(client.find(12).is_some());
    }
}
