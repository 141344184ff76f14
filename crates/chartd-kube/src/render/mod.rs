//! Chart rendering with MiniJinja
//!
//! Templates see three variables:
//! - `values`: chart defaults overlaid with the caller's values
//! - `release`: name, namespace, revision, isInstall, isUpgrade, service
//! - `chart`: the chart's metadata
//!
//! Files whose name starts with `_` are helpers: they can be imported or
//! included but produce no output. `NOTES.txt` of the top-level chart becomes
//! the release notes. Subcharts render first, with values scoped to their
//! name (plus `global`), and are skipped when their dependency condition is
//! false.

mod filters;

use chartd_core::{ChartBundle, ReleaseInfo, ValuesDocument};
use minijinja::{Environment, UndefinedBehavior, context};

use crate::error::{KubeError, Result};

const NOTES_FILE: &str = "NOTES.txt";

/// Output of rendering a chart
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedRelease {
    /// All resources, each preceded by a `# Source:` comment
    pub manifest: String,
    pub notes: Option<String>,
}

/// Render a chart and its subcharts for a release
pub fn render_chart(
    chart: &ChartBundle,
    values: &ValuesDocument,
    release: &ReleaseInfo,
) -> Result<RenderedRelease> {
    let mut merged = chart.values.clone();
    merged.merge(values);

    let mut rendered = RenderedRelease::default();
    render_bundle(chart, &merged, release, chart.name(), true, &mut rendered)?;
    Ok(rendered)
}

fn create_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_trim_blocks(true);

    env.add_filter("toyaml", filters::toyaml);
    env.add_filter("tojson", filters::tojson);
    env.add_filter("b64encode", filters::b64encode);
    env.add_filter("quote", filters::quote);
    env.add_filter("nindent", filters::nindent);
    env.add_filter("indent", filters::indent);
    env.add_filter("required", filters::required);
    env
}

fn render_bundle(
    chart: &ChartBundle,
    values: &ValuesDocument,
    release: &ReleaseInfo,
    source_prefix: &str,
    top_level: bool,
    out: &mut RenderedRelease,
) -> Result<()> {
    for subchart in &chart.subcharts {
        let dependency = chart
            .dependencies()
            .iter()
            .find(|d| d.name == subchart.name());

        if let Some(dep) = dependency
            && !dep.is_enabled_for(values)
        {
            tracing::debug!(chart = %chart.name(), subchart = %subchart.name(), "Subchart disabled by condition");
            continue;
        }

        let scope = dependency.map_or(subchart.name(), |d| d.effective_name());
        let scoped = ValuesDocument::for_subchart(&subchart.values, values, scope);
        let prefix = format!("{}/charts/{}", source_prefix, scope);
        render_bundle(subchart, &scoped, release, &prefix, false, out)?;
    }

    let mut env = create_environment();
    for template in &chart.templates {
        env.add_template_owned(template.name.clone(), template.contents().into_owned())
            .map_err(|e| template_error(source_prefix, &template.name, e))?;
    }

    let ctx = context! {
        values => values.to_json(),
        release => release,
        chart => &chart.metadata,
    };

    for template in &chart.templates {
        let base_name = template.base_name();
        if base_name.starts_with('_') {
            continue;
        }
        let is_notes = base_name == NOTES_FILE;
        if is_notes && !top_level {
            continue;
        }

        let rendered = env
            .get_template(&template.name)
            .and_then(|tmpl| tmpl.render(&ctx))
            .map_err(|e| template_error(source_prefix, &template.name, e))?;

        if is_notes {
            out.notes = Some(rendered.trim().to_string());
            continue;
        }

        let trimmed = rendered.trim();
        if trimmed.is_empty() || trimmed == "---" {
            continue;
        }
        out.manifest.push_str(&format!(
            "---\n# Source: {}/{}\n{}\n",
            source_prefix,
            template.name,
            trimmed.trim_start_matches("---").trim_start_matches('\n')
        ));
    }

    Ok(())
}

fn template_error(prefix: &str, template: &str, err: minijinja::Error) -> KubeError {
    let mut message = format!("{}/{}: {}", prefix, template, err);
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        message.push_str(&format!(": {}", cause));
        source = std::error::Error::source(cause);
    }
    KubeError::Template(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest;
    use chartd_core::{ChartFile, ChartMetadata};

    fn bundle(name: &str, chart_yaml_extra: &str, values: &str, templates: &[(&str, &str)]) -> ChartBundle {
        let metadata: ChartMetadata = serde_yaml::from_str(&format!(
            "apiVersion: v2\nname: {}\nversion: 1.0.0\n{}",
            name, chart_yaml_extra
        ))
        .unwrap();
        ChartBundle {
            metadata,
            values: ValuesDocument::from_yaml(values).unwrap(),
            templates: templates
                .iter()
                .map(|(n, c)| ChartFile {
                    name: format!("templates/{}", n),
                    data: c.as_bytes().to_vec(),
                })
                .collect(),
            subcharts: vec![],
        }
    }

    const DEPLOYMENT: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ release.name }}
  labels:
    app: {{ label(chart.name) }}
spec:
  replicas: {{ values.replicaCount }}
"#;

    fn app() -> ChartBundle {
        bundle(
            "app",
            "",
            "replicaCount: 1\nimage:\n  tag: latest\n",
            &[
                ("_helpers.tpl", "{% macro label(name) %}{{ name }}-web{% endmacro %}"),
                ("deployment.yaml", &format!("{{% from 'templates/_helpers.tpl' import label %}}\n{}", DEPLOYMENT)),
                ("NOTES.txt", "Installed {{ release.name }} revision {{ release.revision }}"),
            ],
        )
    }

    #[test]
    fn test_caller_values_override_defaults() {
        let values = ValuesDocument::from_json(r#"{"replicaCount": 3}"#).unwrap();
        let rendered = render_chart(&app(), &values, &ReleaseInfo::for_install("myapp", "default")).unwrap();

        assert!(rendered.manifest.contains("# Source: app/templates/deployment.yaml"));
        assert!(rendered.manifest.contains("name: myapp"));
        assert!(rendered.manifest.contains("replicas: 3"));
        assert!(rendered.manifest.contains("app: app-web"));
        assert!(!rendered.manifest.contains("_helpers"));
        assert_eq!(rendered.notes.as_deref(), Some("Installed myapp revision 1"));

        let docs = manifest::parse(&rendered.manifest).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].key.name, "myapp");
    }

    #[test]
    fn test_upgrade_release_context() {
        let chart = bundle("app", "", "", &[("cm.yaml", "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\ndata:\n  upgrade: \"{{ release.isUpgrade }}\"\n  revision: \"{{ release.revision }}\"\n")]);
        let rendered = render_chart(
            &chart,
            &ValuesDocument::new(),
            &ReleaseInfo::for_upgrade("myapp", "default", 4),
        )
        .unwrap();

        assert!(rendered.manifest.contains("upgrade: \"true\""));
        assert!(rendered.manifest.contains("revision: \"4\""));
        assert!(rendered.notes.is_none());
    }

    #[test]
    fn test_undefined_value_fails() {
        let chart = bundle("app", "", "", &[("cm.yaml", "value: {{ values.missing.key }}")]);
        let err = render_chart(&chart, &ValuesDocument::new(), &ReleaseInfo::for_install("x", "y")).unwrap_err();

        assert!(matches!(err, KubeError::Template(_)));
        assert!(err.to_string().contains("app/templates/cm.yaml"));
    }

    #[test]
    fn test_subcharts_scoped_and_conditional() {
        let redis = bundle(
            "redis",
            "",
            "replicas: 1\n",
            &[
                ("cm.yaml", "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: redis\ndata:\n  replicas: \"{{ values.replicas }}\"\n  registry: {{ values.global.registry }}\n"),
                ("NOTES.txt", "subchart notes are not shown"),
            ],
        );
        let metrics = bundle(
            "metrics",
            "",
            "",
            &[("cm.yaml", "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: metrics\n")],
        );

        let mut parent = bundle(
            "app",
            "dependencies:\n  - name: redis\n    version: ^1\n    alias: cache\n  - name: metrics\n    version: ^1\n    condition: metrics.enabled\n",
            "global:\n  registry: docker.io\ncache:\n  replicas: 2\nmetrics:\n  enabled: false\n",
            &[],
        );
        parent.subcharts = vec![metrics, redis];

        let rendered = render_chart(&parent, &ValuesDocument::new(), &ReleaseInfo::for_install("r", "ns")).unwrap();

        assert!(rendered.manifest.contains("# Source: app/charts/cache/templates/cm.yaml"));
        assert!(rendered.manifest.contains("replicas: \"2\""));
        assert!(rendered.manifest.contains("registry: docker.io"));
        assert!(!rendered.manifest.contains("name: metrics"));
        assert!(rendered.notes.is_none());

        let enabled = ValuesDocument::from_json(r#"{"metrics": {"enabled": true}}"#).unwrap();
        let rendered = render_chart(&parent, &enabled, &ReleaseInfo::for_install("r", "ns")).unwrap();
        assert!(rendered.manifest.contains("name: metrics"));
    }
}
