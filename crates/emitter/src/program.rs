//! Whole-program assembly: imports header, schema classes, helper objects,
//! per-operator snippets in topological order, and the main wrapper.

use askama::Template;

use common::BackendKind;
use dataflow::DataflowPlan;

use crate::error::BackendError;
use crate::scala::schema_class_declarations;
use crate::{flinks, spark};

/// What the driver knows at emission time.
#[derive(Debug, Clone)]
pub struct EmitConfig {
    /// Name of the emitted object (derived from the script name).
    pub name: String,
    pub backend: BackendKind,
    /// Collector URL; installs the performance listener when present.
    pub profiling_url: Option<String>,
}

#[derive(Template)]
#[template(
    source = "import org.apache.spark.SparkContext
import org.apache.spark.SparkContext._
import org.apache.spark.SparkConf
import org.apache.spark.storage.StorageLevel

{{ schema_classes }}
{{ helpers }}
object {{ name }} {
  def main(args: Array[String]) {
    val conf = new SparkConf().setAppName(\"{{ name }}_App\")
    val sc = new SparkContext(conf)
{% match profiling_url %}{% when Some with (url) %}    val perf = new PerfMonitor(\"{{ url }}\")
    sc.addSparkListener(perf)
{% when None %}{% endmatch %}{{ snippets }}
    sc.stop()
  }
}
",
    ext = "txt"
)]
struct SparkProgram<'a> {
    name: &'a str,
    schema_classes: &'a str,
    helpers: &'a str,
    snippets: &'a str,
    profiling_url: Option<&'a str>,
}

#[derive(Template)]
#[template(
    source = "import org.apache.flink.streaming.api.scala._
import org.apache.flink.streaming.api.windowing.time.Time
import org.apache.flink.streaming.api.windowing.assigners.TumblingEventTimeWindows
import org.apache.flink.cep.scala.CEP
import org.apache.flink.cep.scala.pattern.Pattern
import org.apache.flink.util.Collector

{{ schema_classes }}
{{ helpers }}
object {{ name }} {
  def main(args: Array[String]) {
    val env = StreamExecutionEnvironment.getExecutionEnvironment
{% match profiling_url %}{% when Some with (url) %}    env.getConfig.setGlobalJobParameters(new ProfilingParams(\"{{ url }}\"))
{% when None %}{% endmatch %}{{ snippets }}
    env.execute(\"{{ name }}_App\")
  }
}
",
    ext = "txt"
)]
struct FlinksProgram<'a> {
    name: &'a str,
    schema_classes: &'a str,
    helpers: &'a str,
    snippets: &'a str,
    profiling_url: Option<&'a str>,
}

/// Walk the final plan and render the complete backend source file.
pub fn emit_program(plan: &DataflowPlan, config: &EmitConfig) -> Result<String, BackendError> {
    let order = plan
        .topo_order()
        .map_err(|err| BackendError::Render(err.to_string()))?;

    let mut helpers = Vec::new();
    let mut snippets = Vec::new();
    for idx in order {
        let helper = match config.backend {
            BackendKind::Spark => spark::emit_helper(plan, idx)?,
            BackendKind::Flinks => flinks::emit_helper(plan, idx)?,
        };
        if let Some(helper) = helper {
            helpers.push(helper);
        }
        let snippet = match config.backend {
            BackendKind::Spark => spark::emit_operator(plan, idx)?,
            BackendKind::Flinks => flinks::emit_operator(plan, idx)?,
        };
        snippets.push(indent(&snippet, 4));
    }

    let schema_classes = schema_class_declarations(plan);
    let helpers = helpers.join("\n");
    let snippets = snippets.join("\n");

    let rendered = match config.backend {
        BackendKind::Spark => SparkProgram {
            name: &config.name,
            schema_classes: &schema_classes,
            helpers: &helpers,
            snippets: &snippets,
            profiling_url: config.profiling_url.as_deref(),
        }
        .render(),
        BackendKind::Flinks => FlinksProgram {
            name: &config.name,
            schema_classes: &schema_classes,
            helpers: &helpers,
            snippets: &snippets,
            profiling_url: config.profiling_url.as_deref(),
        }
        .render(),
    };
    rendered.map_err(|err| BackendError::Render(err.to_string()))
}

fn indent(snippet: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    snippet
        .lines()
        .map(|line| format!("{}{}", pad, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow::{CmpOp, Expr, Field, FieldType, Literal, Operator, Predicate, Ref, Schema};

    fn xy() -> Schema {
        Schema::from_fields(vec![
            Field::new("x", FieldType::Int),
            Field::new("y", FieldType::Int),
        ])
    }

    fn small_plan() -> DataflowPlan {
        DataflowPlan::new(vec![
            Operator::load("a", "f.csv", Some(xy())),
            Operator::filter(
                "b",
                "a",
                Predicate::Cmp(
                    CmpOp::Gt,
                    Expr::named("x"),
                    Expr::Ref(Ref::Value(Literal::Int(0))),
                ),
            ),
            Operator::store("b", "out"),
        ])
        .unwrap()
    }

    #[test]
    fn spark_program_has_wrapper_and_classes() {
        let plan = small_plan();
        let config = EmitConfig {
            name: "wordcount".into(),
            backend: BackendKind::Spark,
            profiling_url: None,
        };
        let program = emit_program(&plan, &config).unwrap();
        assert!(program.contains("import org.apache.spark.SparkContext"));
        assert!(program.contains("case class t"));
        assert!(program.contains("object wordcount {"));
        assert!(program.contains("val sc = new SparkContext(conf)"));
        assert!(program.contains("val b = a.filter(t => t.x > 0)"));
        assert!(program.contains("sc.stop()"));
        assert!(!program.contains("PerfMonitor"));
    }

    #[test]
    fn profiling_installs_the_listener() {
        let plan = small_plan();
        let config = EmitConfig {
            name: "job".into(),
            backend: BackendKind::Spark,
            profiling_url: Some("http://localhost:8080".into()),
        };
        let program = emit_program(&plan, &config).unwrap();
        assert!(program.contains("new PerfMonitor(\"http://localhost:8080\")"));
        assert!(program.contains("sc.addSparkListener(perf)"));
    }

    #[test]
    fn flinks_program_wraps_in_execution_environment() {
        let plan = small_plan();
        let config = EmitConfig {
            name: "job".into(),
            backend: BackendKind::Flinks,
            profiling_url: None,
        };
        let program = emit_program(&plan, &config).unwrap();
        assert!(program.contains("StreamExecutionEnvironment.getExecutionEnvironment"));
        assert!(program.contains("env.execute(\"job_App\")"));
    }

    #[test]
    fn snippets_appear_in_dependency_order() {
        let plan = small_plan();
        let config = EmitConfig {
            name: "job".into(),
            backend: BackendKind::Spark,
            profiling_url: None,
        };
        let program = emit_program(&plan, &config).unwrap();
        let load_pos = program.find("sc.textFile").unwrap();
        let filter_pos = program.find("a.filter").unwrap();
        let store_pos = program.find("saveAsTextFile").unwrap();
        assert!(load_pos < filter_pos && filter_pos < store_pos);
    }
}
