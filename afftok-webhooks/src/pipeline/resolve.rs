use super::types::{PipelineScope, WebhookPipeline};
use uuid::Uuid;

/// Offer-scoped pipelines hide advertiser- and global-scoped ones; if none
/// match, advertiser-scoped hide global. Scopes are never unioned.
pub fn resolve_pipelines(
    candidates: &[WebhookPipeline],
    offer_id: Option<Uuid>,
    advertiser_id: Option<Uuid>,
) -> Vec<&WebhookPipeline> {
    let active: Vec<&WebhookPipeline> = candidates.iter().filter(|p| p.active).collect();

    if let Some(offer_id) = offer_id {
        let offer_matches: Vec<&WebhookPipeline> = active
            .iter()
            .copied()
            .filter(|p| matches!(p.scope(), PipelineScope::Offer(id) if id == offer_id))
            .collect();
        if !offer_matches.is_empty() {
            return offer_matches;
        }
    }

    if let Some(advertiser_id) = advertiser_id {
        let advertiser_matches: Vec<&WebhookPipeline> = active
            .iter()
            .copied()
            .filter(|p| matches!(p.scope(), PipelineScope::Advertiser(id) if id == advertiser_id))
            .collect();
        if !advertiser_matches.is_empty() {
            return advertiser_matches;
        }
    }

    active.into_iter().filter(|p| matches!(p.scope(), PipelineScope::Global)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::TriggerType;

    fn pipeline(scope: PipelineScope, active: bool) -> WebhookPipeline {
        let (offer_id, advertiser_id) = match scope {
            PipelineScope::Offer(id) => (Some(id), None),
            PipelineScope::Advertiser(id) => (None, Some(id)),
            PipelineScope::Global => (None, None),
        };
        WebhookPipeline {
            id: Uuid::new_v4(),
            trigger_type: TriggerType::Click,
            offer_id,
            advertiser_id,
            active,
            steps: vec![],
            max_retries: 3,
            priority: 0,
        }
    }

    #[test]
    fn offer_scope_hides_advertiser_and_global() {
        let offer_id = Uuid::new_v4();
        let advertiser_id = Uuid::new_v4();
        let pipelines = vec![
            pipeline(PipelineScope::Offer(offer_id), true),
            pipeline(PipelineScope::Advertiser(advertiser_id), true),
            pipeline(PipelineScope::Global, true),
        ];

        let resolved = resolve_pipelines(&pipelines, Some(offer_id), Some(advertiser_id));
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].scope(), PipelineScope::Offer(offer_id));
    }

    #[test]
    fn falls_back_to_advertiser_then_global() {
        let offer_id = Uuid::new_v4();
        let advertiser_id = Uuid::new_v4();
        let pipelines = vec![pipeline(PipelineScope::Advertiser(advertiser_id), true), pipeline(PipelineScope::Global, true)];

        let resolved = resolve_pipelines(&pipelines, Some(offer_id), Some(advertiser_id));
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].scope(), PipelineScope::Advertiser(advertiser_id));

        let resolved_global = resolve_pipelines(&[pipeline(PipelineScope::Global, true)], Some(offer_id), Some(advertiser_id));
        assert_eq!(resolved_global.len(), 1);
        assert_eq!(resolved_global[0].scope(), PipelineScope::Global);
    }

    #[test]
    fn inactive_pipelines_are_excluded() {
        let offer_id = Uuid::new_v4();
        let pipelines = vec![pipeline(PipelineScope::Offer(offer_id), false), pipeline(PipelineScope::Global, true)];
        let resolved = resolve_pipelines(&pipelines, Some(offer_id), None);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].scope(), PipelineScope::Global);
    }
}
