//! Finite-state dialog trees for multi-turn rule-based flows.
//!
//! A [`DecisionTree`] is static configuration: nodes keyed by id, each a
//! question, response, process, or exit node, with labeled transitions.
//! Non-exit nodes must carry a `"default"` transition; unknown input
//! always resolves to it (fail-soft). A tree referencing a missing node
//! is rejected at registration — that is fatal, not fail-soft.
//!
//! [`NavigatorState`] is the serializable cursor the rule-based tier
//! stores between turns.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use kotoba_types::{KotobaError, Result};

/// Node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Presents a message and waits for input.
    Question,
    /// Presents a message and auto-advances on "default".
    Response,
    /// Applies a named side-effect and auto-advances.
    Process,
    /// Terminal node.
    Exit,
}

/// One node in a dialog tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    /// What the node does.
    pub kind: NodeKind,

    /// Message presented to the player; `{name}` placeholders are filled
    /// from the navigator variables.
    #[serde(default)]
    pub message: String,

    /// Named side-effect for process nodes.
    #[serde(default)]
    pub action: Option<String>,

    /// Label -> next node id. `"default"` is mandatory except on exits.
    #[serde(default)]
    pub transitions: HashMap<String, String>,
}

/// A static dialog tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Stable tree id.
    pub id: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Id of the entry node.
    pub root_node_id: String,

    /// Nodes keyed by id.
    pub nodes: HashMap<String, TreeNode>,
}

/// Serializable cursor into a tree, persisted between turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigatorState {
    /// The tree being navigated.
    pub tree_id: String,

    /// The node the navigator is at.
    pub current_node_id: String,

    /// Variables collected along the way, used in message rendering.
    #[serde(default)]
    pub variables: HashMap<String, String>,

    /// (node id, input) pairs consumed so far.
    #[serde(default)]
    pub history: Vec<(String, String)>,

    /// Whether the current question node has been presented.
    #[serde(default)]
    pub awaiting_input: bool,

    /// Set once an exit node is reached; further steps are no-ops.
    #[serde(default)]
    pub terminal: bool,
}

/// The outcome of one navigation step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Text to present to the player (may span auto-advanced nodes).
    pub output: String,
    /// The updated cursor.
    pub state: NavigatorState,
    /// Whether the tree is finished.
    pub terminal: bool,
}

/// Registry and navigator for dialog trees. Immutable after load.
#[derive(Debug, Default)]
pub struct DecisionTreeEngine {
    trees: HashMap<String, DecisionTree>,
}

impl DecisionTreeEngine {
    /// Auto-advance bound; a tree that loops through this many nodes in
    /// one step is treated as broken.
    const MAX_AUTO_ADVANCE: usize = 32;

    /// An engine with no trees.
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine preloaded with the built-in trees.
    pub fn with_builtin_trees() -> Self {
        let mut engine = Self::new();
        engine
            .register(builtin_vocabulary_tree())
            .expect("built-in tree is valid");
        engine
    }

    /// Validate and register a tree.
    pub fn register(&mut self, tree: DecisionTree) -> Result<()> {
        validate_tree(&tree)?;
        debug!(tree_id = %tree.id, nodes = tree.nodes.len(), "registered dialog tree");
        self.trees.insert(tree.id.clone(), tree);
        Ok(())
    }

    /// Load a tree from its YAML representation.
    pub fn register_yaml(&mut self, yaml: &str) -> Result<()> {
        let tree: DecisionTree = serde_yaml::from_str(yaml)?;
        self.register(tree)
    }

    /// Ids of all registered trees.
    pub fn tree_ids(&self) -> Vec<&str> {
        self.trees.keys().map(String::as_str).collect()
    }

    /// A fresh cursor at the root of `tree_id`.
    pub fn start(&self, tree_id: &str) -> Result<NavigatorState> {
        let tree = self
            .trees
            .get(tree_id)
            .ok_or_else(|| KotobaError::UnknownTree(tree_id.to_string()))?;
        Ok(NavigatorState {
            tree_id: tree.id.clone(),
            current_node_id: tree.root_node_id.clone(),
            variables: HashMap::new(),
            history: Vec::new(),
            awaiting_input: false,
            terminal: false,
        })
    }

    /// Advance the navigator with one player input.
    ///
    /// Questions consume the input (unknown labels resolve to
    /// `"default"`); responses and processes auto-advance; an exit node
    /// sets the terminal flag. Stepping a terminal state is a no-op.
    pub fn step(&self, state: &NavigatorState, input: &str) -> Result<StepOutcome> {
        if state.terminal {
            return Ok(StepOutcome {
                output: String::new(),
                state: state.clone(),
                terminal: true,
            });
        }

        let tree = self
            .trees
            .get(&state.tree_id)
            .ok_or_else(|| KotobaError::UnknownTree(state.tree_id.clone()))?;

        let mut state = state.clone();
        let mut outputs: Vec<String> = Vec::new();

        for _ in 0..Self::MAX_AUTO_ADVANCE {
            let node = tree.nodes.get(&state.current_node_id).ok_or_else(|| {
                KotobaError::InvalidTree {
                    tree_id: tree.id.clone(),
                    reason: format!("missing node '{}'", state.current_node_id),
                }
            })?;

            match node.kind {
                NodeKind::Question => {
                    if !state.awaiting_input {
                        outputs.push(render_message(&node.message, &state.variables));
                        state.awaiting_input = true;
                        break;
                    }
                    let label = select_transition(node, input);
                    let next = transition_target(tree, node, &label, &state.current_node_id)?;
                    state
                        .history
                        .push((state.current_node_id.clone(), input.to_string()));
                    state.variables.insert("input".into(), input.to_string());
                    state.awaiting_input = false;
                    state.current_node_id = next;
                }
                NodeKind::Response => {
                    outputs.push(render_message(&node.message, &state.variables));
                    let next = transition_target(tree, node, "default", &state.current_node_id)?;
                    state.current_node_id = next;
                }
                NodeKind::Process => {
                    let label = apply_action(node.action.as_deref(), input, &mut state.variables);
                    let next = transition_target(tree, node, &label, &state.current_node_id)?;
                    state.current_node_id = next;
                }
                NodeKind::Exit => {
                    if !node.message.is_empty() {
                        outputs.push(render_message(&node.message, &state.variables));
                    }
                    state.terminal = true;
                    break;
                }
            }
        }

        let terminal = state.terminal;
        Ok(StepOutcome {
            output: outputs.join(" "),
            state,
            terminal,
        })
    }
}

fn validate_tree(tree: &DecisionTree) -> Result<()> {
    if !tree.nodes.contains_key(&tree.root_node_id) {
        return Err(KotobaError::InvalidTree {
            tree_id: tree.id.clone(),
            reason: format!("root node '{}' does not exist", tree.root_node_id),
        });
    }
    for (node_id, node) in &tree.nodes {
        if node.kind != NodeKind::Exit && !node.transitions.contains_key("default") {
            return Err(KotobaError::InvalidTree {
                tree_id: tree.id.clone(),
                reason: format!("node '{node_id}' has no \"default\" transition"),
            });
        }
        for target in node.transitions.values() {
            if !tree.nodes.contains_key(target) {
                return Err(KotobaError::InvalidTree {
                    tree_id: tree.id.clone(),
                    reason: format!("node '{node_id}' references missing node '{target}'"),
                });
            }
        }
    }
    Ok(())
}

/// Match `input` against the node's transition labels; no match resolves
/// to `"default"`.
fn select_transition(node: &TreeNode, input: &str) -> String {
    let normalized = input.trim().to_lowercase();
    let mut labels: Vec<&String> = node.transitions.keys().collect();
    labels.sort();
    for label in labels {
        if label == "default" {
            continue;
        }
        let spoken = label.replace('_', " ");
        if normalized == spoken || (spoken.len() >= 2 && normalized.contains(&spoken)) {
            return label.clone();
        }
    }
    "default".into()
}

fn transition_target(
    tree: &DecisionTree,
    node: &TreeNode,
    label: &str,
    node_id: &str,
) -> Result<String> {
    node.transitions
        .get(label)
        .or_else(|| node.transitions.get("default"))
        .cloned()
        .ok_or_else(|| KotobaError::InvalidTree {
            tree_id: tree.id.clone(),
            reason: format!("node '{node_id}' has no transition for '{label}'"),
        })
}

/// Built-in process-node side effects.
fn apply_action(
    action: Option<&str>,
    input: &str,
    variables: &mut HashMap<String, String>,
) -> String {
    match action {
        Some("capture_input") => {
            variables.insert("input".into(), input.to_string());
            "default".into()
        }
        Some("capture_word") => {
            // Prefer a quoted token; otherwise the last word of the input.
            let word = input
                .split('\'')
                .nth(1)
                .map(str::to_string)
                .or_else(|| input.split_whitespace().last().map(str::to_string));
            match word {
                Some(word) if !word.is_empty() => {
                    variables.insert("word".into(), word);
                    "word_found".into()
                }
                _ => "default".into(),
            }
        }
        _ => "default".into(),
    }
}

fn render_message(message: &str, variables: &HashMap<String, String>) -> String {
    let mut out = message.to_string();
    for (key, value) in variables {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Built-in vocabulary-help dialog tree.
pub fn builtin_vocabulary_tree() -> DecisionTree {
    DecisionTree {
        id: "vocabulary_help".into(),
        name: "Vocabulary Help".into(),
        root_node_id: "ask_word".into(),
        nodes: HashMap::from([
            (
                "ask_word".into(),
                TreeNode {
                    kind: NodeKind::Question,
                    message: "Which word would you like to know about?".into(),
                    action: None,
                    transitions: HashMap::from([("default".into(), "capture".into())]),
                },
            ),
            (
                "capture".into(),
                TreeNode {
                    kind: NodeKind::Process,
                    message: String::new(),
                    action: Some("capture_word".into()),
                    transitions: HashMap::from([
                        ("word_found".into(), "explain".into()),
                        ("default".into(), "ask_word".into()),
                    ]),
                },
            ),
            (
                "explain".into(),
                TreeNode {
                    kind: NodeKind::Response,
                    message: "Let me look up '{word}' for you.".into(),
                    action: None,
                    transitions: HashMap::from([("default".into(), "ask_more".into())]),
                },
            ),
            (
                "ask_more".into(),
                TreeNode {
                    kind: NodeKind::Question,
                    message: "Was that helpful?".into(),
                    action: None,
                    transitions: HashMap::from([
                        ("yes".into(), "finish".into()),
                        ("no".into(), "ask_word".into()),
                        ("default".into(), "finish".into()),
                    ]),
                },
            ),
            (
                "finish".into(),
                TreeNode {
                    kind: NodeKind::Exit,
                    message: "Great! Let me know if you need another word.".into(),
                    action: None,
                    transitions: HashMap::new(),
                },
            ),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> DecisionTreeEngine {
        DecisionTreeEngine::with_builtin_trees()
    }

    #[test]
    fn start_positions_at_root() {
        let state = engine().start("vocabulary_help").unwrap();
        assert_eq!(state.current_node_id, "ask_word");
        assert!(!state.terminal);
        assert!(!state.awaiting_input);
    }

    #[test]
    fn start_unknown_tree_fails() {
        assert!(matches!(
            engine().start("nonexistent"),
            Err(KotobaError::UnknownTree(_))
        ));
    }

    #[test]
    fn first_step_presents_root_question() {
        let engine = engine();
        let state = engine.start("vocabulary_help").unwrap();
        let outcome = engine.step(&state, "").unwrap();
        assert!(outcome.output.contains("Which word"));
        assert!(outcome.state.awaiting_input);
        assert!(!outcome.terminal);
    }

    #[test]
    fn full_walk_through_tree() {
        let engine = engine();
        let state = engine.start("vocabulary_help").unwrap();

        // Present the question.
        let outcome = engine.step(&state, "").unwrap();
        // Answer with a word: process captures it, response renders it,
        // the follow-up question is presented.
        let outcome = engine.step(&outcome.state, "kippu").unwrap();
        assert!(outcome.output.contains("'kippu'"), "{}", outcome.output);
        assert!(outcome.output.contains("Was that helpful?"));
        assert_eq!(outcome.state.variables["word"], "kippu");

        // Saying yes exits.
        let outcome = engine.step(&outcome.state, "yes").unwrap();
        assert!(outcome.terminal);
        assert!(outcome.output.contains("another word"));
    }

    #[test]
    fn unknown_answer_resolves_to_default() {
        let engine = engine();
        let state = engine.start("vocabulary_help").unwrap();
        let outcome = engine.step(&state, "").unwrap();
        let outcome = engine.step(&outcome.state, "densha").unwrap();
        // "banana phone" matches neither yes nor no: the default
        // transition exits the tree.
        let outcome = engine.step(&outcome.state, "banana phone").unwrap();
        assert!(outcome.terminal);
    }

    #[test]
    fn terminal_state_steps_are_noops() {
        let engine = engine();
        let state = engine.start("vocabulary_help").unwrap();
        let outcome = engine.step(&state, "").unwrap();
        let outcome = engine.step(&outcome.state, "eki").unwrap();
        let outcome = engine.step(&outcome.state, "yes").unwrap();
        assert!(outcome.terminal);

        let again = engine.step(&outcome.state, "hello?").unwrap();
        assert!(again.terminal);
        assert!(again.output.is_empty());
        assert_eq!(again.state.current_node_id, outcome.state.current_node_id);
    }

    #[test]
    fn exit_root_tree_terminates_immediately() {
        let mut engine = DecisionTreeEngine::new();
        engine
            .register(DecisionTree {
                id: "farewell".into(),
                name: String::new(),
                root_node_id: "bye".into(),
                nodes: HashMap::from([(
                    "bye".into(),
                    TreeNode {
                        kind: NodeKind::Exit,
                        message: "Goodbye!".into(),
                        action: None,
                        transitions: HashMap::new(),
                    },
                )]),
            })
            .unwrap();

        let state = engine.start("farewell").unwrap();
        let outcome = engine.step(&state, "").unwrap();
        assert!(outcome.terminal);
        assert_eq!(outcome.output, "Goodbye!");

        let again = engine.step(&outcome.state, "wait").unwrap();
        assert!(again.terminal);
        assert!(again.output.is_empty());
    }

    #[test]
    fn missing_root_rejected() {
        let mut engine = DecisionTreeEngine::new();
        let err = engine
            .register(DecisionTree {
                id: "broken".into(),
                name: String::new(),
                root_node_id: "ghost".into(),
                nodes: HashMap::new(),
            })
            .unwrap_err();
        assert!(matches!(err, KotobaError::InvalidTree { .. }));
    }

    #[test]
    fn dangling_transition_rejected() {
        let mut engine = DecisionTreeEngine::new();
        let err = engine
            .register(DecisionTree {
                id: "broken".into(),
                name: String::new(),
                root_node_id: "a".into(),
                nodes: HashMap::from([(
                    "a".into(),
                    TreeNode {
                        kind: NodeKind::Question,
                        message: "?".into(),
                        action: None,
                        transitions: HashMap::from([("default".into(), "ghost".into())]),
                    },
                )]),
            })
            .unwrap_err();
        match err {
            KotobaError::InvalidTree { reason, .. } => {
                assert!(reason.contains("ghost"), "{reason}")
            }
            other => panic!("expected InvalidTree, got: {other}"),
        }
    }

    #[test]
    fn missing_default_transition_rejected() {
        let mut engine = DecisionTreeEngine::new();
        let err = engine
            .register(DecisionTree {
                id: "broken".into(),
                name: String::new(),
                root_node_id: "a".into(),
                nodes: HashMap::from([
                    (
                        "a".into(),
                        TreeNode {
                            kind: NodeKind::Question,
                            message: "?".into(),
                            action: None,
                            transitions: HashMap::from([("yes".into(), "b".into())]),
                        },
                    ),
                    (
                        "b".into(),
                        TreeNode {
                            kind: NodeKind::Exit,
                            message: String::new(),
                            action: None,
                            transitions: HashMap::new(),
                        },
                    ),
                ]),
            })
            .unwrap_err();
        assert!(matches!(err, KotobaError::InvalidTree { .. }));
    }

    #[test]
    fn state_roundtrips_through_json() {
        let engine = engine();
        let state = engine.start("vocabulary_help").unwrap();
        let outcome = engine.step(&state, "").unwrap();

        let json = serde_json::to_string(&outcome.state).unwrap();
        let restored: NavigatorState = serde_json::from_str(&json).unwrap();
        let outcome = engine.step(&restored, "kippu").unwrap();
        assert_eq!(outcome.state.variables["word"], "kippu");
    }

    #[test]
    fn register_from_yaml() {
        let mut engine = DecisionTreeEngine::new();
        engine
            .register_yaml(
                r#"
id: ticket_flow
root_node_id: start
nodes:
  start:
    kind: question
    message: "Where would you like to go?"
    transitions:
      default: done
  done:
    kind: exit
    message: "Safe travels!"
"#,
            )
            .unwrap();
        assert!(engine.tree_ids().contains(&"ticket_flow"));
    }
}
