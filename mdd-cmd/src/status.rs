use anyhow::{Context, Result};
use chrono::DateTime;
use handlebars::handlebars_helper;
use mdd::{reassembly::latest_by_node, state::Checkpoint, Config};
use serde::Serialize;
use std::io::{stdout, Write};

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Device {
    node: u32,
    device_id: String,
    bytes: u64,
    last: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Node {
    node: u32,
    offset: u64,
    latest_end: u64,
    latest_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct File {
    name: String,
    file_size: u64,
    output_index: u32,
    unprocessed_ranges: usize,
    unprocessed_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
struct Status {
    data_dir: String,
    sections: usize,
    devices: Vec<Device>,
    nodes: Vec<Node>,
    files: Vec<File>,
}

fn format_time(secs: i64) -> Option<String> {
    DateTime::from_timestamp(secs, 0).map(|t| t.to_rfc3339())
}

fn summarize(config: &Config, checkpoint: &Checkpoint) -> Status {
    let devices = checkpoint
        .stats
        .iter()
        .map(|(node, device_id, stats)| Device {
            node,
            device_id: device_id.to_string(),
            bytes: stats.bytes,
            last: format_time(stats.last),
        })
        .collect();
    let nodes = latest_by_node(&checkpoint.sections, config.framed_port)
        .into_iter()
        .map(|(node, latest)| Node {
            node,
            offset: checkpoint.offset(node),
            latest_end: latest.end,
            latest_time: format_time(latest.timestamp),
        })
        .collect();
    let files = checkpoint
        .files
        .iter()
        .map(|(name, state)| File {
            name: name.clone(),
            file_size: state.file_size,
            output_index: state.output_index,
            unprocessed_ranges: state.unprocessed.len(),
            unprocessed_bytes: state.unprocessed.iter().map(|s| s.end - s.start).sum(),
        })
        .collect();

    Status {
        data_dir: config.data_dir.to_string_lossy().to_string(),
        sections: checkpoint.sections.len(),
        devices,
        nodes,
        files,
    }
}

pub fn status(config: &Config, checkpoint: &Checkpoint, format: &Format) -> Result<()> {
    let status = summarize(config, checkpoint);

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &status).context("serializing to json")
        }
        Format::Text => {
            let data = render_text(&status).context("serializing status")?;
            stdout()
                .write_all(data.as_bytes())
                .context("writing to stdout")
        }
    }
}

fn render_text(status: &Status) -> Result<String> {
    handlebars_helper!(left_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => String::new(),
            _ => v.to_string()
        };
        let width = usize::try_from(num).unwrap_or_default().max(v.len());
        format!("{v:>width$}")
    });
    let mut hb = handlebars::Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_template_string("status", TEXT_TEMPLATE)
        .context("registering template")?;

    hb.render("status", status).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ data_dir }}
===============================================================================================
Sections: {{ sections }}
-----------------------------------------------------------------------------------------------
Node  Device                Bytes  Last
-----------------------------------------------------------------------------------------------
{{ #each devices }}{{ lpad 4 node }}  {{ lpad 12 device_id }}  {{ lpad 12 bytes }}  {{ last }}
{{/each }}-----------------------------------------------------------------------------------------------
Node   Start offset    Latest end  Latest time
-----------------------------------------------------------------------------------------------
{{ #each nodes }}{{ lpad 4 node }}  {{ lpad 13 offset }}  {{ lpad 12 latest_end }}  {{ latest_time }}
{{/each }}-----------------------------------------------------------------------------------------------
File                  Size   Index   Ranges   Unprocessed
-----------------------------------------------------------------------------------------------
{{ #each files }}{{ lpad 16 name }}  {{ lpad 10 file_size }}  {{ lpad 6 output_index }}  {{ lpad 7 unprocessed_ranges }}  {{ lpad 12 unprocessed_bytes }}
{{/each }}";
