use std::collections::{BTreeMap, BTreeSet};

use crate::config::defs::PipelineError;
use crate::engine::record::{RecordKey, StageRecord};
use crate::engine::stage::{ResourceClass, StageNode, StageSpec};
use crate::engine::stream::{Emitter, Stream, Subscription};


/// A combinator instance wired between streams.
pub enum Operator {
    Each {
        name: String,
        input: Subscription<StageRecord>,
        values: Subscription<StageRecord>,
        slots: Vec<(&'static str, &'static str)>,
        output: Emitter<StageRecord>,
    },
    Join {
        name: String,
        left: Subscription<StageRecord>,
        right: Subscription<StageRecord>,
        output: Emitter<StageRecord>,
    },
    Collect {
        name: String,
        input: Subscription<StageRecord>,
        key: RecordKey,
        expected: Option<usize>,
        mandatory: bool,
        output: Emitter<StageRecord>,
    },
    GroupBy {
        name: String,
        input: Subscription<StageRecord>,
        groups: BTreeMap<String, usize>,
        output: Emitter<StageRecord>,
    },
}

impl Operator {
    pub fn name(&self) -> &str {
        match self {
            Operator::Each { name, .. }
            | Operator::Join { name, .. }
            | Operator::Collect { name, .. }
            | Operator::GroupBy { name, .. } => name,
        }
    }

    fn shape(&self) -> OperatorShape {
        let (kind, inputs, output, mandatory) = match self {
            Operator::Each { input, values, output, .. } => (
                "each",
                vec![input.name().to_string(), values.name().to_string()],
                output.stream_name(),
                false,
            ),
            Operator::Join { left, right, output, .. } => (
                "join",
                vec![left.name().to_string(), right.name().to_string()],
                output.stream_name(),
                false,
            ),
            Operator::Collect { input, output, mandatory, .. } => (
                "collect",
                vec![input.name().to_string()],
                output.stream_name(),
                *mandatory,
            ),
            Operator::GroupBy { input, output, .. } => (
                "group_by",
                vec![input.name().to_string()],
                output.stream_name(),
                true,
            ),
        };
        OperatorShape {
            kind,
            name: self.name().to_string(),
            inputs,
            output: output.to_string(),
            mandatory,
        }
    }
}


#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeShape {
    pub name: String,
    pub tool: String,
    pub class: ResourceClass,
    pub input: String,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OperatorShape {
    pub kind: &'static str,
    pub name: String,
    pub inputs: Vec<String>,
    pub output: String,
    pub mandatory: bool,
}

/// Comparable description of a built graph. Two graphs are isomorphic when their shapes are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphShape {
    pub sources: Vec<String>,
    pub nodes: Vec<NodeShape>,
    pub operators: Vec<OperatorShape>,
}

impl GraphShape {
    /// Name of the node or operator producing a stream, or the stream itself for sources.
    pub fn producer_of(&self, stream: &str) -> Vec<String> {
        if self.sources.iter().any(|s| s == stream) {
            return vec![stream.to_string()];
        }
        let mut producers: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| n.outputs.iter().any(|o| o == stream))
            .map(|n| n.name.clone())
            .collect();
        producers.extend(
            self.operators
                .iter()
                .filter(|o| o.output == stream)
                .map(|o| o.name.clone()),
        );
        producers
    }

    pub fn node(&self, name: &str) -> Option<&NodeShape> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn operator(&self, name: &str) -> Option<&OperatorShape> {
        self.operators.iter().find(|o| o.name == name)
    }
}


/// A concrete stage graph, ready for the scheduler.
pub struct Graph {
    pub(crate) sources: Vec<Stream<StageRecord>>,
    pub(crate) nodes: Vec<StageNode>,
    pub(crate) operators: Vec<Operator>,
}

impl Graph {
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }

    pub fn has_stage(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n.name() == name)
    }

    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.nodes.iter().find(|n| n.name() == name).map(|n| &n.spec)
    }

    /// External tools the graph invokes.
    pub fn tools(&self) -> BTreeSet<&'static str> {
        self.nodes.iter().map(|n| n.spec.tool).collect()
    }

    /// Barriers whose expected cardinality decides the run status.
    pub fn mandatory_barriers(&self) -> Vec<String> {
        self.operators
            .iter()
            .filter_map(|op| match op {
                Operator::Collect { name, mandatory: true, .. } | Operator::GroupBy { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn shape(&self) -> GraphShape {
        let mut sources: Vec<String> = self.sources.iter().map(|s| s.name().to_string()).collect();
        sources.sort();
        let mut nodes: Vec<NodeShape> = self
            .nodes
            .iter()
            .map(|n| NodeShape {
                name: n.name().to_string(),
                tool: n.spec.tool.to_string(),
                class: n.spec.class,
                input: n.input_name().to_string(),
                outputs: n.output_names(),
            })
            .collect();
        nodes.sort();
        let mut operators: Vec<OperatorShape> = self.operators.iter().map(|o| o.shape()).collect();
        operators.sort();
        GraphShape { sources, nodes, operators }
    }
}


/// Incremental wiring of streams, combinators and stage nodes.
#[derive(Default)]
pub struct GraphBuilder {
    sources: Vec<Stream<StageRecord>>,
    streams: Vec<Stream<StageRecord>>,
    nodes: Vec<StageNode>,
    operators: Vec<Operator>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        GraphBuilder::default()
    }

    /// Registers a pre-filled (closed or sentinel) stream.
    pub fn source(&mut self, stream: Stream<StageRecord>) -> Stream<StageRecord> {
        self.sources.push(stream.clone());
        stream
    }

    /// Open stream that any number of stages may later feed.
    pub fn stream(&mut self, name: &str) -> Stream<StageRecord> {
        let stream = Stream::new(name);
        self.streams.push(stream.clone());
        stream
    }

    pub fn each(
        &mut self,
        name: &str,
        input: &Stream<StageRecord>,
        values: &Stream<StageRecord>,
        slots: &[(&'static str, &'static str)],
    ) -> Stream<StageRecord> {
        let out = self.stream(name);
        self.operators.push(Operator::Each {
            name: name.to_string(),
            input: input.subscribe(),
            values: values.subscribe(),
            slots: slots.to_vec(),
            output: out.emitter(),
        });
        out
    }

    pub fn join(&mut self, name: &str, left: &Stream<StageRecord>, right: &Stream<StageRecord>) -> Stream<StageRecord> {
        let out = self.stream(name);
        self.operators.push(Operator::Join {
            name: name.to_string(),
            left: left.subscribe(),
            right: right.subscribe(),
            output: out.emitter(),
        });
        out
    }

    pub fn collect(
        &mut self,
        name: &str,
        input: &Stream<StageRecord>,
        expected: Option<usize>,
        mandatory: bool,
    ) -> Stream<StageRecord> {
        let out = self.stream(name);
        self.operators.push(Operator::Collect {
            name: name.to_string(),
            input: input.subscribe(),
            key: RecordKey::All,
            expected,
            mandatory,
            output: out.emitter(),
        });
        out
    }

    pub fn group_by(&mut self, name: &str, input: &Stream<StageRecord>, groups: BTreeMap<String, usize>) -> Stream<StageRecord> {
        let out = self.stream(name);
        self.operators.push(Operator::GroupBy {
            name: name.to_string(),
            input: input.subscribe(),
            groups,
            output: out.emitter(),
        });
        out
    }

    /// Adds a stage node. Its own output stream is named after the stage; `also_into` are further streams the
    /// same output records are pushed to.
    pub fn stage(
        &mut self,
        spec: StageSpec,
        input: &Stream<StageRecord>,
        also_into: &[&Stream<StageRecord>],
    ) -> Stream<StageRecord> {
        let out = self.stream(spec.name);
        let mut outputs = vec![&out];
        outputs.extend_from_slice(also_into);
        self.nodes.push(StageNode::new(spec, input, &outputs));
        out
    }

    /// Finishes wiring. Every open stream must have at least one producer, otherwise it would never close.
    pub fn build(self) -> Result<Graph, PipelineError> {
        if let Some(orphan) = self.streams.iter().find(|s| s.producers() == 0 && !s.is_closed()) {
            return Err(PipelineError::InvalidConfig(format!("stream {} has no producer", orphan.name())));
        }
        Ok(Graph {
            sources: self.sources,
            nodes: self.nodes,
            operators: self.operators,
        })
    }
}
