use async_trait::async_trait;
use lexcol::config::Config;
use lexcol::embedding::{
    EmbedOptions, EmbeddingCache, EmbeddingError, EmbeddingProvider, ProviderOutput,
};
use lexcol::graph::CitationGraph;
use lexcol::service::{Engine, IpcClient, IpcMessage, Service};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

struct LengthProvider;

#[async_trait]
impl EmbeddingProvider for LengthProvider {
    async fn embed(
        &self,
        texts: &[String],
        _options: EmbedOptions,
    ) -> Result<ProviderOutput, EmbeddingError> {
        Ok(ProviderOutput::Dense(
            texts
                .iter()
                .map(|t| vec![t.chars().count() as f32, 1.0])
                .collect(),
        ))
    }

    fn dimension(&self) -> usize {
        2
    }

    fn model_name(&self) -> &str {
        "length"
    }
}

fn write_graph(path: &Path) {
    let graph = json!({
        "nodes": [
            {"id": "et-art-240", "type": "statute-article", "label": "Artículo 240 ET"},
            {"id": "ley-2277-2022", "type": "law", "label": "Ley 2277 de 2022"}
        ],
        "edges": [
            {"source": "ley-2277-2022", "target": "et-art-240", "relation": "MODIFIES"}
        ]
    });
    std::fs::write(path, serde_json::to_string(&graph).unwrap()).unwrap();
}

async fn start_service(base: &Path, max_requests: usize) -> (IpcClient, tokio::task::JoinHandle<()>) {
    let graph_path = base.join("graph.json");
    write_graph(&graph_path);

    let mut config = Config::default();
    config.service.socket_path = base.join("lexcol.sock");
    config.graph.path = graph_path.clone();
    config.rate_limit.max_requests = max_requests;

    let graph = Arc::new(CitationGraph::load(&graph_path).unwrap());
    let cache = Arc::new(EmbeddingCache::new(Arc::new(LengthProvider), 100, true));
    let engine = Engine::with_parts(&config, cache, graph).unwrap();
    let service = Service::with_engine(&config, engine).unwrap();

    let handle = tokio::spawn(async move {
        service.run_foreground().await.unwrap();
    });

    // Wait for the socket to appear
    for _ in 0..50 {
        if config.service.socket_path.exists() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }

    (IpcClient::new(config.service.socket_path.clone()), handle)
}

#[tokio::test]
async fn test_service_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let (client, handle) = start_service(temp_dir.path(), 20).await;

    let response = client.send(&IpcMessage::Status).await.unwrap();
    assert!(response.success, "Status request should succeed");

    let response = client
        .send(&IpcMessage::Route {
            query: "¿Qué dijo el Consejo de Estado sobre la tarifa?".to_string(),
        })
        .await
        .unwrap();
    let data = response.data.unwrap();
    assert_eq!(data["collections"][0]["collection"], "jurisprudencia");

    let response = client
        .send(&IpcMessage::Lookup {
            document: "Art. 240 ET".to_string(),
            client: None,
        })
        .await
        .unwrap();
    let view = response.data.unwrap();
    assert_eq!(view["center"], "et-art-240");
    assert_eq!(view["nodes"][0]["center"], true);
    assert_eq!(view["edges"].as_array().unwrap().len(), 1);

    let chunks = serde_json::from_value(json!([
        {
            "id": "et-art-240#1",
            "sourceDocId": "et-art-240",
            "text": "Parágrafo primero.",
            "similarityScore": 0.7,
            "metadata": {"title": "Artículo 240 ET", "chunkIndex": 1, "legalState": "modificado"}
        },
        {
            "id": "et-art-240#0",
            "sourceDocId": "et-art-240",
            "text": "La tarifa general es del 35%.",
            "similarityScore": 0.9,
            "metadata": {"title": "Artículo 240 ET", "chunkIndex": 0, "legalState": "modificado"}
        }
    ]))
    .unwrap();
    let response = client
        .send(&IpcMessage::Assemble {
            chunks,
            chunks_retrieved: Some(12),
            client: Some("10.0.0.7".to_string()),
        })
        .await
        .unwrap();
    assert!(response.success);
    let data = response.data.unwrap();
    assert_eq!(data["context"]["articles"].as_array().unwrap().len(), 1);
    assert_eq!(
        data["context"]["articles"][0]["text"],
        "La tarifa general es del 35%.\n\nParágrafo primero."
    );
    assert_eq!(data["context"]["debug"]["chunks_retrieved"], 12);
    let rendered = data["rendered"].as_str().unwrap();
    assert!(rendered.starts_with("[et-art-240 | Artículo 240 ET | Estado: modificado |"));
    assert!(rendered.contains("Ley 2277 de 2022"));

    let response = client
        .send(&IpcMessage::Embed {
            texts: vec!["tarifa".to_string(), "tarifa".to_string()],
            client: None,
        })
        .await
        .unwrap();
    let data = response.data.unwrap();
    assert_eq!(data["vectors"][0], data["vectors"][1]);

    let response = client.send(&IpcMessage::Stats).await.unwrap();
    let stats = response.data.unwrap();
    assert_eq!(stats["cache"]["size"], 1);
    assert_eq!(stats["graph"]["edge_count"], 1);

    let response = client.send(&IpcMessage::Stop).await.unwrap();
    assert!(response.success);

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("service did not stop")
        .unwrap();
    assert!(!temp_dir.path().join("lexcol.sock").exists());
}

#[tokio::test]
async fn test_service_throttles_per_client() {
    let temp_dir = TempDir::new().unwrap();
    let (client, handle) = start_service(temp_dir.path(), 2).await;

    let lookup = |who: &str| IpcMessage::Lookup {
        document: "ley 2277 de 2022".to_string(),
        client: Some(who.to_string()),
    };

    assert!(client.send(&lookup("a")).await.unwrap().success);
    assert!(client.send(&lookup("a")).await.unwrap().success);

    let rejected = client.send(&lookup("a")).await.unwrap();
    assert!(!rejected.success);
    let retry_after = rejected.retry_after().unwrap();
    assert!((1..=60).contains(&retry_after));

    assert!(client.send(&lookup("b")).await.unwrap().success);

    client.send(&IpcMessage::Stop).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("service did not stop")
        .unwrap();
}
