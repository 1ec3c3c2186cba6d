//! Arena view over an analysis tree.
//!
//! The nested channel -> application -> module -> API records are flattened
//! into a `Vec` of nodes addressed by [`NodeId`]. Validation, aggregation and
//! report rendering all traverse the same arena through [`Visitor`].

use crate::types::{AffectedApplication, AffectedChannel, AffectedModule, ImpactedApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
pub enum NodeKind<'a> {
    Channel(&'a AffectedChannel),
    Application(&'a AffectedApplication),
    Module(&'a AffectedModule),
    Api(&'a ImpactedApi),
}

impl<'a> NodeKind<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            NodeKind::Channel(c) => &c.id,
            NodeKind::Application(a) => &a.id,
            NodeKind::Module(m) => &m.id,
            NodeKind::Api(api) => &api.id,
        }
    }

    pub fn name(&self) -> &'a str {
        match self {
            NodeKind::Channel(c) => &c.name,
            NodeKind::Application(a) => &a.name,
            NodeKind::Module(m) => &m.name,
            NodeKind::Api(api) => &api.name,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Channel(_) => "channel",
            NodeKind::Application(_) => "application",
            NodeKind::Module(_) => "module",
            NodeKind::Api(_) => "api",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node<'a> {
    pub kind: NodeKind<'a>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Number of affected APIs in this node's subtree (itself included).
    pub affected_below: u32,
}

/// Callbacks for a depth-first, pre/post-order walk.
pub trait Visitor<'a> {
    fn enter(&mut self, _tree: &ImpactTree<'a>, _id: NodeId) {}
    fn leave(&mut self, _tree: &ImpactTree<'a>, _id: NodeId) {}
}

#[derive(Debug, Clone, Default)]
pub struct ImpactTree<'a> {
    nodes: Vec<Node<'a>>,
    roots: Vec<NodeId>,
}

impl<'a> ImpactTree<'a> {
    pub fn build(channels: &'a [AffectedChannel]) -> Self {
        let mut tree = ImpactTree::default();
        for channel in channels {
            let c = tree.push(NodeKind::Channel(channel), None);
            tree.roots.push(c);
            for app in &channel.applications {
                let a = tree.push(NodeKind::Application(app), Some(c));
                for module in &app.modules {
                    let m = tree.push(NodeKind::Module(module), Some(a));
                    for api in &module.apis {
                        tree.push(NodeKind::Api(api), Some(m));
                    }
                }
            }
        }

        // Children always come after their parent, so a reverse sweep
        // accumulates subtree counts bottom-up.
        for i in (0..tree.nodes.len()).rev() {
            if let NodeKind::Api(api) = tree.nodes[i].kind {
                if api.is_affected {
                    tree.nodes[i].affected_below += 1;
                }
            }
            if let Some(parent) = tree.nodes[i].parent {
                let below = tree.nodes[i].affected_below;
                tree.nodes[parent.0].affected_below += below;
            }
        }

        tree
    }

    fn push(&mut self, kind: NodeKind<'a>, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent,
            children: Vec::new(),
            affected_below: 0,
        });
        if let Some(p) = parent {
            self.nodes[p.0].children.push(id);
        }
        id
    }

    pub fn node(&self, id: NodeId) -> &Node<'a> {
        &self.nodes[id.0]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in depth-first pre-order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node<'a>)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn apis(&self) -> impl Iterator<Item = (NodeId, &'a ImpactedApi)> + '_ {
        self.iter().filter_map(|(id, n)| match n.kind {
            NodeKind::Api(api) => Some((id, api)),
            _ => None,
        })
    }

    /// Iterative depth-first walk calling `enter` before and `leave` after
    /// each node's children.
    pub fn walk<V: Visitor<'a>>(&self, visitor: &mut V) {
        let mut stack: Vec<(NodeId, bool)> = self.roots.iter().rev().map(|&r| (r, false)).collect();
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                visitor.leave(self, id);
                continue;
            }
            visitor.enter(self, id);
            stack.push((id, true));
            for &child in self.nodes[id.0].children.iter().rev() {
                stack.push((child, false));
            }
        }
    }
}
